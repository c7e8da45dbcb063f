use hdrhistogram::Histogram;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Histogram values are stored as integers in thousandths of the sample unit
/// (microseconds for millisecond latencies).
pub const HISTOGRAM_SCALE: f64 = 1_000.0;

/// Significant decimal digits kept by every histogram.
pub const HISTOGRAM_SIGNIFICANT_DIGITS: u8 = 3;

/// Upper bound on the relative error of any percentile read from a histogram.
///
/// Three significant digits means two values that differ by more than 0.1 % never
/// share a bucket. Values above one hour (in milliseconds) saturate at the top bucket
/// and values below `1 / HISTOGRAM_SCALE` are recorded as zero.
pub const HISTOGRAM_RELATIVE_ERROR: f64 = 0.001;

const HISTOGRAM_MAX_SCALED: u64 = 3_600_000 * 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
    Rate,
    #[strum(serialize = "histogram", serialize = "trend")]
    Histogram,
}

pub(crate) fn new_histogram() -> Histogram<u64> {
    match Histogram::<u64>::new_with_max(HISTOGRAM_MAX_SCALED, HISTOGRAM_SIGNIFICANT_DIGITS) {
        Ok(h) => h,
        Err(err) => panic!("failed to create histogram: {err}"),
    }
}

/// Streaming distribution of one series: exact count/sum/min/max plus an HDR
/// histogram for percentiles.
#[derive(Debug, Clone)]
pub struct HistogramSeries {
    hist: Histogram<u64>,
    sum: f64,
    min: f64,
    max: f64,
}

impl Default for HistogramSeries {
    fn default() -> Self {
        Self {
            hist: new_histogram(),
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }
}

impl HistogramSeries {
    /// Negative and non-finite values are recorded as zero.
    pub fn record(&mut self, value: f64) {
        let value = if value.is_finite() && value > 0.0 {
            value
        } else {
            0.0
        };

        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.hist
            .saturating_record((value * HISTOGRAM_SCALE).round() as u64);
    }

    pub fn merge(&mut self, other: &HistogramSeries) {
        if other.count() == 0 {
            return;
        }
        // Both sides share the same bounds, so `add` cannot fail.
        let _ = self.hist.add(&other.hist);
        self.sum += other.sum;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    pub fn count(&self) -> u64 {
        self.hist.len()
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn min(&self) -> Option<f64> {
        (self.count() > 0).then_some(self.min)
    }

    pub fn max(&self) -> Option<f64> {
        (self.count() > 0).then_some(self.max)
    }

    pub fn mean(&self) -> Option<f64> {
        let count = self.count();
        (count > 0).then(|| self.sum / count as f64)
    }

    pub fn stdev(&self) -> Option<f64> {
        (self.count() > 0).then(|| self.hist.stdev() / HISTOGRAM_SCALE)
    }

    /// Estimated percentile, `p` in `0.0..=100.0`.
    ///
    /// The estimate is clamped to the exact observed min/max so it never reports a
    /// value outside the recorded range.
    pub fn percentile(&self, p: f64) -> Option<f64> {
        if self.count() == 0 {
            return None;
        }
        let p = p.clamp(0.0, 100.0);
        let raw = self.hist.value_at_percentile(p) as f64 / HISTOGRAM_SCALE;
        Some(raw.clamp(self.min, self.max))
    }

    pub fn summary(&self) -> HistogramSummary {
        HistogramSummary {
            count: self.count(),
            sum: self.sum,
            min: self.min(),
            max: self.max(),
            mean: self.mean(),
            stdev: self.stdev(),
            p50: self.percentile(50.0),
            p90: self.percentile(90.0),
            p95: self.percentile(95.0),
            p99: self.percentile(99.0),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateCounts {
    pub total: u64,
    pub hits: u64,
}

impl RateCounts {
    /// `hits / total`, or 0 when nothing was recorded. Check `total` to tell "no data"
    /// apart from a genuine zero rate.
    pub fn rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.hits as f64 / self.total as f64
    }

    pub fn has_data(&self) -> bool {
        self.total > 0
    }

    fn merge(&mut self, other: RateCounts) {
        self.total = self.total.saturating_add(other.total);
        self.hits = self.hits.saturating_add(other.hits);
    }
}

#[derive(Debug)]
pub(crate) enum MetricStorage {
    Counter(Arc<AtomicU64>),
    Gauge(Arc<AtomicI64>),
    // `hits` and `total` move together under one lock so readers never see half a sample.
    Rate(Arc<Mutex<RateCounts>>),
    Histogram(Arc<Mutex<HistogramSeries>>),
}

impl MetricStorage {
    pub(crate) fn new(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => Self::Counter(Arc::new(AtomicU64::new(0))),
            MetricKind::Gauge => Self::Gauge(Arc::new(AtomicI64::new(0))),
            MetricKind::Rate => Self::Rate(Arc::new(Mutex::new(RateCounts::default()))),
            MetricKind::Histogram => {
                Self::Histogram(Arc::new(Mutex::new(HistogramSeries::default())))
            }
        }
    }

    pub(crate) fn handle(&self) -> MetricHandle {
        match self {
            Self::Counter(a) => MetricHandle::Counter(a.clone()),
            Self::Gauge(a) => MetricHandle::Gauge(a.clone()),
            Self::Rate(a) => MetricHandle::Rate(a.clone()),
            Self::Histogram(a) => MetricHandle::Histogram(a.clone()),
        }
    }

    pub(crate) fn snapshot(&self) -> MetricSnapshot {
        match self {
            Self::Counter(c) => MetricSnapshot::Counter(c.load(Ordering::Relaxed)),
            Self::Gauge(g) => MetricSnapshot::Gauge(g.load(Ordering::Relaxed)),
            Self::Rate(r) => MetricSnapshot::Rate(*r.lock()),
            Self::Histogram(h) => MetricSnapshot::Histogram(h.lock().clone()),
        }
    }

    /// Merges this series into an accumulator without cloning the histogram.
    pub(crate) fn merge_into(&self, acc: &mut MetricSnapshot) {
        match (self, acc) {
            (Self::Counter(c), MetricSnapshot::Counter(v)) => {
                *v = v.saturating_add(c.load(Ordering::Relaxed));
            }
            (Self::Gauge(g), MetricSnapshot::Gauge(v)) => {
                *v = v.saturating_add(g.load(Ordering::Relaxed));
            }
            (Self::Rate(r), MetricSnapshot::Rate(counts)) => counts.merge(*r.lock()),
            (Self::Histogram(h), MetricSnapshot::Histogram(series)) => series.merge(&h.lock()),
            _ => {}
        }
    }
}

/// Cheap, clonable write handle to one series.
#[derive(Debug, Clone)]
pub enum MetricHandle {
    Counter(Arc<AtomicU64>),
    Gauge(Arc<AtomicI64>),
    Rate(Arc<Mutex<RateCounts>>),
    Histogram(Arc<Mutex<HistogramSeries>>),
}

impl MetricHandle {
    #[inline]
    pub fn increment(&self, value: u64) {
        if let Self::Counter(c) = self {
            c.fetch_add(value, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn set_gauge(&self, value: i64) {
        if let Self::Gauge(g) = self {
            g.store(value, Ordering::Relaxed);
        }
    }

    /// Adds `delta` and returns the new value.
    #[inline]
    pub fn add_gauge(&self, delta: i64) -> i64 {
        match self {
            Self::Gauge(g) => g.fetch_add(delta, Ordering::Relaxed).saturating_add(delta),
            _ => 0,
        }
    }

    /// Raises the gauge to `value` if it is currently lower.
    #[inline]
    pub fn raise_gauge(&self, value: i64) {
        if let Self::Gauge(g) = self {
            g.fetch_max(value, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn add_rate(&self, hit: bool) {
        if let Self::Rate(r) = self {
            let mut counts = r.lock();
            counts.total = counts.total.saturating_add(1);
            if hit {
                counts.hits = counts.hits.saturating_add(1);
            }
        }
    }

    #[inline]
    pub fn observe(&self, value: f64) {
        if let Self::Histogram(h) = self {
            h.lock().record(value);
        }
    }

    pub fn get_counter(&self) -> u64 {
        match self {
            Self::Counter(c) => c.load(Ordering::Relaxed),
            _ => 0,
        }
    }

    pub fn get_gauge(&self) -> i64 {
        match self {
            Self::Gauge(g) => g.load(Ordering::Relaxed),
            _ => 0,
        }
    }

    pub fn get_rate(&self) -> RateCounts {
        match self {
            Self::Rate(r) => *r.lock(),
            _ => RateCounts::default(),
        }
    }
}

/// Point-in-time, owned view of a metric (one series, or several merged).
#[derive(Debug, Clone)]
pub enum MetricSnapshot {
    Counter(u64),
    Gauge(i64),
    Rate(RateCounts),
    Histogram(HistogramSeries),
}

impl MetricSnapshot {
    pub fn empty(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => Self::Counter(0),
            MetricKind::Gauge => Self::Gauge(0),
            MetricKind::Rate => Self::Rate(RateCounts::default()),
            MetricKind::Histogram => Self::Histogram(HistogramSeries::default()),
        }
    }

    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Counter(_) => MetricKind::Counter,
            Self::Gauge(_) => MetricKind::Gauge,
            Self::Rate(_) => MetricKind::Rate,
            Self::Histogram(_) => MetricKind::Histogram,
        }
    }

    /// Number of samples behind the snapshot. Counters report their sum.
    pub fn count(&self) -> u64 {
        match self {
            Self::Counter(v) => *v,
            Self::Gauge(_) => 1,
            Self::Rate(r) => r.total,
            Self::Histogram(h) => h.count(),
        }
    }

    pub fn value(&self) -> MetricValue {
        match self {
            Self::Counter(v) => MetricValue::Counter(*v),
            Self::Gauge(v) => MetricValue::Gauge(*v),
            Self::Rate(r) => MetricValue::Rate {
                total: r.total,
                hits: r.hits,
                rate: r.has_data().then(|| r.rate()),
            },
            Self::Histogram(h) => MetricValue::Histogram(h.summary()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricSeriesSummary {
    pub name: String,
    pub kind: MetricKind,
    pub tags: Vec<(String, String)>,
    pub values: MetricValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Counter(u64),
    Gauge(i64),
    Rate {
        total: u64,
        hits: u64,
        rate: Option<f64>,
    },
    Histogram(HistogramSummary),
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub stdev: Option<f64>,
    pub p50: Option<f64>,
    pub p90: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_histogram_has_no_stats() {
        let s = HistogramSeries::default().summary();
        assert_eq!(s.count, 0);
        assert!(s.p50.is_none());
        assert!(s.min.is_none());
        assert!(s.max.is_none());
        assert!(s.mean.is_none());
        assert!(s.stdev.is_none());
    }

    #[test]
    fn histogram_tracks_exact_sum_min_max() {
        let mut h = HistogramSeries::default();
        h.record(10.0);
        h.record(20.5);
        h.record(30.0);

        assert_eq!(h.count(), 3);
        assert_eq!(h.min(), Some(10.0));
        assert_eq!(h.max(), Some(30.0));
        assert!((h.sum() - 60.5).abs() < 1e-9);
        assert_eq!(h.mean(), Some(60.5 / 3.0));
    }

    #[test]
    fn p95_of_skewed_samples_stays_within_declared_error() {
        let mut h = HistogramSeries::default();
        for v in [100.0, 100.0, 100.0, 100.0, 900.0] {
            h.record(v);
        }

        let p95 = h.percentile(95.0).unwrap_or_else(|| panic!("expected p95"));
        assert!(p95 >= 100.0, "p95={p95}");
        assert!(p95 <= 900.0 * (1.0 + HISTOGRAM_RELATIVE_ERROR), "p95={p95}");

        let p50 = h.percentile(50.0).unwrap_or_else(|| panic!("expected p50"));
        assert!((p50 - 100.0).abs() <= 100.0 * HISTOGRAM_RELATIVE_ERROR, "p50={p50}");
    }

    #[test]
    fn percentile_error_is_bounded_over_a_wide_range() {
        let mut h = HistogramSeries::default();
        for v in 1..=10_000u32 {
            h.record(f64::from(v) * 0.37);
        }

        for p in [50.0, 90.0, 99.0, 99.9] {
            let exact = (p / 100.0 * 10_000.0_f64).ceil() * 0.37;
            let got = h.percentile(p).unwrap_or_else(|| panic!("expected p{p}"));
            let rel = (got - exact).abs() / exact;
            assert!(rel <= HISTOGRAM_RELATIVE_ERROR, "p{p}: got={got} exact={exact}");
        }
    }

    #[test]
    fn negative_values_record_as_zero() {
        let mut h = HistogramSeries::default();
        h.record(-5.0);
        h.record(f64::NAN);
        assert_eq!(h.count(), 2);
        assert_eq!(h.max(), Some(0.0));
    }

    #[test]
    fn merge_combines_counts_and_extremes() {
        let mut a = HistogramSeries::default();
        a.record(5.0);
        let mut b = HistogramSeries::default();
        b.record(1.0);
        b.record(50.0);

        a.merge(&b);
        assert_eq!(a.count(), 3);
        assert_eq!(a.min(), Some(1.0));
        assert_eq!(a.max(), Some(50.0));
    }

    #[test]
    fn rate_is_zero_without_data() {
        let r = RateCounts::default();
        assert_eq!(r.rate(), 0.0);
        assert!(!r.has_data());

        let r = RateCounts { total: 4, hits: 1 };
        assert_eq!(r.rate(), 0.25);
    }

    #[test]
    fn handles_update_their_series() {
        let c = MetricStorage::new(MetricKind::Counter).handle();
        c.increment(2);
        c.increment(3);
        assert_eq!(c.get_counter(), 5);

        let g = MetricStorage::new(MetricKind::Gauge).handle();
        g.set_gauge(10);
        assert_eq!(g.add_gauge(-3), 7);
        g.raise_gauge(4);
        assert_eq!(g.get_gauge(), 7);
        g.raise_gauge(12);
        assert_eq!(g.get_gauge(), 12);

        let r = MetricStorage::new(MetricKind::Rate).handle();
        r.add_rate(true);
        r.add_rate(false);
        assert_eq!(r.get_rate(), RateCounts { total: 2, hits: 1 });
    }

    #[test]
    fn kind_parses_trend_alias() {
        assert_eq!("trend".parse::<MetricKind>().ok(), Some(MetricKind::Histogram));
        assert_eq!(MetricKind::Histogram.to_string(), "histogram");
        assert_eq!(MetricKind::Rate.to_string(), "rate");
    }
}
