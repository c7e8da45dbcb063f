use dashmap::DashMap;
use parking_lot::RwLock;

use crate::key::{Interner, KeyId};
use crate::metrics::{MetricHandle, MetricKind, MetricSeriesSummary, MetricSnapshot, MetricStorage};
use crate::query::Query;
use crate::sample::MetricSample;
use crate::tags::TagSet;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown metric `{0}`")]
    UnknownMetric(String),

    #[error("metric `{name}` is already registered as a {existing}, not a {requested}")]
    KindMismatch {
        name: String,
        existing: MetricKind,
        requested: MetricKind,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MetricId(u32);

#[derive(Debug)]
struct MetricDef {
    name: KeyId,
    kind: MetricKind,
}

/// Concurrent metrics collector.
///
/// Series live in a sharded map keyed by metric id, then by tag set. Counters and
/// gauges merge with single atomic operations; rates and histograms merge under a
/// per-series lock, so writers of different series never contend.
#[derive(Debug, Default)]
pub struct Registry {
    interner: Interner,
    defs: RwLock<Vec<MetricDef>>,
    storage: DashMap<MetricId, DashMap<TagSet, MetricStorage>>,
}

impl Registry {
    /// Registers a metric, or returns the existing id if `name` is already known
    /// with the same kind.
    pub fn register(&self, name: &str, kind: MetricKind) -> Result<MetricId> {
        let name_id = self.interner.get_or_intern(name);

        let mut defs = self.defs.write();
        if let Some((idx, def)) = defs.iter().enumerate().find(|(_, d)| d.name == name_id) {
            if def.kind != kind {
                return Err(Error::KindMismatch {
                    name: name.to_string(),
                    existing: def.kind,
                    requested: kind,
                });
            }
            return Ok(MetricId(idx as u32));
        }

        let id = MetricId(defs.len() as u32);
        defs.push(MetricDef {
            name: name_id,
            kind,
        });
        self.storage.insert(id, DashMap::new());
        Ok(id)
    }

    pub fn lookup_metric(&self, name: &str) -> Option<(MetricId, MetricKind)> {
        let name_id = self.interner.get(name)?;
        let defs = self.defs.read();
        defs.iter()
            .enumerate()
            .find(|(_, d)| d.name == name_id)
            .map(|(idx, d)| (MetricId(idx as u32), d.kind))
    }

    pub fn kind(&self, metric: MetricId) -> Option<MetricKind> {
        self.defs.read().get(metric.0 as usize).map(|d| d.kind)
    }

    pub fn name(&self, metric: MetricId) -> Option<String> {
        let name = self.defs.read().get(metric.0 as usize)?.name;
        self.interner.resolve(name).map(|s| s.to_string())
    }

    pub fn resolve_key(&self, key: &str) -> KeyId {
        self.interner.get_or_intern(key)
    }

    pub(crate) fn existing_key(&self, key: &str) -> Option<KeyId> {
        self.interner.get(key)
    }

    pub fn resolve_tags(&self, tags: &[(&str, &str)]) -> TagSet {
        TagSet::from_pairs(
            tags.iter()
                .map(|(k, v)| (self.resolve_key(k), self.resolve_key(v))),
        )
    }

    pub fn tag_strings(&self, tags: &TagSet) -> Vec<(String, String)> {
        let resolve = |id| {
            self.interner
                .resolve(id)
                .map(|s| s.to_string())
                .unwrap_or_default()
        };
        tags.iter().map(|(k, v)| (resolve(k), resolve(v))).collect()
    }

    /// Returns the write handle for a series, creating the series on first use.
    pub fn get_handle(&self, metric: MetricId, tags: TagSet) -> Option<MetricHandle> {
        // Read the kind before touching `storage`: `register` holds `defs` while inserting.
        let kind = self.kind(metric)?;
        let series_map = self.storage.get(&metric)?;

        if let Some(storage) = series_map.get(&tags) {
            return Some(storage.handle());
        }

        let storage = series_map
            .entry(tags)
            .or_insert_with(|| MetricStorage::new(kind));
        Some(storage.handle())
    }

    /// Merges one sample into its series.
    ///
    /// Counters add `value` (rounded, negatives ignored), gauges take `value`,
    /// rates count any non-zero value as a hit, histograms record `value`.
    pub fn record(&self, sample: &MetricSample) -> Result<()> {
        let (metric, kind) = self
            .lookup_metric(&sample.name)
            .ok_or_else(|| Error::UnknownMetric(sample.name.clone()))?;

        let tags = TagSet::from_pairs(
            sample
                .tags
                .iter()
                .map(|(k, v)| (self.resolve_key(k), self.resolve_key(v))),
        );
        let handle = self
            .get_handle(metric, tags)
            .ok_or_else(|| Error::UnknownMetric(sample.name.clone()))?;

        match kind {
            MetricKind::Counter => {
                if sample.value.is_finite() && sample.value > 0.0 {
                    handle.increment(sample.value.round() as u64);
                }
            }
            MetricKind::Gauge => handle.set_gauge(sample.value.round() as i64),
            MetricKind::Rate => handle.add_rate(sample.value != 0.0),
            MetricKind::Histogram => handle.observe(sample.value),
        }

        Ok(())
    }

    /// Aggregate of every series of `name`, or `None` if the metric is unknown.
    ///
    /// A registered metric without samples yields an empty snapshot.
    pub fn snapshot(&self, name: &str) -> Option<MetricSnapshot> {
        let (metric, _) = self.lookup_metric(name)?;
        Some(self.query(metric).merge())
    }

    pub fn query(&self, metric: MetricId) -> Query<'_> {
        Query::new(self, metric)
    }

    pub(crate) fn visit_series(&self, metric: MetricId, mut f: impl FnMut(&TagSet, &MetricStorage)) {
        let Some(series_map) = self.storage.get(&metric) else {
            return;
        };
        for series in series_map.iter() {
            f(series.key(), series.value());
        }
    }

    fn metric_ids(&self) -> Vec<MetricId> {
        (0..self.defs.read().len() as u32).map(MetricId).collect()
    }

    /// One merged summary per metric, sorted by name.
    pub fn summarize(&self) -> Vec<MetricSeriesSummary> {
        let mut out: Vec<MetricSeriesSummary> = self
            .metric_ids()
            .into_iter()
            .filter_map(|id| {
                let name = self.name(id)?;
                let snapshot = self.query(id).merge();
                Some(MetricSeriesSummary {
                    name,
                    kind: snapshot.kind(),
                    tags: Vec::new(),
                    values: snapshot.value(),
                })
            })
            .collect();

        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// One summary per tagged series, sorted by name then tags.
    pub fn summarize_series(&self) -> Vec<MetricSeriesSummary> {
        let mut out = Vec::new();

        for id in self.metric_ids() {
            let Some(name) = self.name(id) else {
                continue;
            };
            self.visit_series(id, |tags, storage| {
                let snapshot = storage.snapshot();
                out.push(MetricSeriesSummary {
                    name: name.clone(),
                    kind: snapshot.kind(),
                    tags: self.tag_strings(tags),
                    values: snapshot.value(),
                });
            });
        }

        out.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.tags.cmp(&b.tags)));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricValue;

    #[test]
    fn register_is_idempotent_per_kind() {
        let reg = Registry::default();
        let a = reg.register("http_reqs", MetricKind::Counter);
        let b = reg.register("http_reqs", MetricKind::Counter);
        assert_eq!(a.ok(), b.ok());

        let err = reg.register("http_reqs", MetricKind::Rate);
        assert!(matches!(err, Err(Error::KindMismatch { .. })));
    }

    #[test]
    fn record_unknown_metric_is_rejected() {
        let reg = Registry::default();
        let err = reg.record(&MetricSample::new("nope", 1.0));
        assert!(matches!(err, Err(Error::UnknownMetric(name)) if name == "nope"));
    }

    #[test]
    fn snapshot_merges_tagged_series() -> Result<()> {
        let reg = Registry::default();
        reg.register("http_req_duration", MetricKind::Histogram)?;

        reg.record(&MetricSample::new("http_req_duration", 10.0).with_tag("status", "200"))?;
        reg.record(&MetricSample::new("http_req_duration", 30.0).with_tag("status", "500"))?;
        reg.record(&MetricSample::new("http_req_duration", 20.0))?;

        let Some(MetricSnapshot::Histogram(h)) = reg.snapshot("http_req_duration") else {
            panic!("expected histogram snapshot");
        };
        assert_eq!(h.count(), 3);
        assert_eq!(h.min(), Some(10.0));
        assert_eq!(h.max(), Some(30.0));
        assert_eq!(reg.summarize_series().len(), 3);
        Ok(())
    }

    #[test]
    fn snapshot_of_registered_metric_without_samples_is_empty() -> Result<()> {
        let reg = Registry::default();
        reg.register("checks", MetricKind::Rate)?;

        let Some(MetricSnapshot::Rate(r)) = reg.snapshot("checks") else {
            panic!("expected rate snapshot");
        };
        assert!(!r.has_data());
        assert!(reg.snapshot("missing").is_none());
        Ok(())
    }

    #[test]
    fn record_applies_kind_semantics() -> Result<()> {
        let reg = Registry::default();
        reg.register("iterations", MetricKind::Counter)?;
        reg.register("vus", MetricKind::Gauge)?;
        reg.register("checks", MetricKind::Rate)?;

        reg.record(&MetricSample::new("iterations", 2.0))?;
        reg.record(&MetricSample::new("iterations", -1.0))?;
        reg.record(&MetricSample::new("vus", 5.0))?;
        reg.record(&MetricSample::new("vus", 3.0))?;
        reg.record(&MetricSample::flag("checks", true))?;
        reg.record(&MetricSample::flag("checks", false))?;

        let summary = reg.summarize();
        let value = |name: &str| {
            summary
                .iter()
                .find(|s| s.name == name)
                .map(|s| s.values.clone())
        };

        assert_eq!(value("iterations"), Some(MetricValue::Counter(2)));
        assert_eq!(value("vus"), Some(MetricValue::Gauge(3)));
        assert_eq!(
            value("checks"),
            Some(MetricValue::Rate {
                total: 2,
                hits: 1,
                rate: Some(0.5)
            })
        );
        Ok(())
    }
}
