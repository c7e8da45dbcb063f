use std::time::Duration;

use stampede_metrics::{MetricHandle, MetricId, MetricKind, Registry, TagSet};

use crate::error::Result;

pub const ITERATIONS: &str = "iterations";
pub const ITERATION_DURATION: &str = "iteration_duration";
pub const ITERATION_FAILED: &str = "iteration_failed";
pub const CHECKS: &str = "checks";
pub const HTTP_REQS: &str = "http_reqs";
pub const HTTP_REQ_DURATION: &str = "http_req_duration";
pub const HTTP_REQ_FAILED: &str = "http_req_failed";
pub const DATA_RECEIVED: &str = "data_received";
pub const VUS: &str = "vus";
pub const VUS_MAX: &str = "vus_max";

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1_000.0
}

/// Outcome of one request/response exchange, whatever the protocol.
#[derive(Debug, Clone, Copy)]
pub struct RequestSample<'a> {
    pub name: &'a str,
    pub method: &'a str,
    /// `None` when the transport failed before a status was received.
    pub status: Option<u16>,
    pub duration: Duration,
    pub bytes_received: u64,
    /// Stable transport error name, e.g. `timeout`.
    pub error: Option<&'a str>,
}

impl RequestSample<'_> {
    pub fn failed(&self) -> bool {
        self.status.is_none_or(|s| s >= 400)
    }
}

/// Ids and untagged handles of the metrics the engine records on its own.
#[derive(Debug, Clone)]
pub struct BuiltinMetrics {
    iterations: MetricHandle,
    iteration_duration: MetricHandle,
    iteration_failed: MetricHandle,
    vus: MetricHandle,
    vus_max: MetricHandle,
    checks: MetricId,
    http_reqs: MetricId,
    http_req_duration: MetricId,
    http_req_failed: MetricId,
    data_received: MetricId,
}

fn handle(metrics: &Registry, id: MetricId) -> Result<MetricHandle> {
    let handle = metrics.get_handle(id, TagSet::default());
    handle.ok_or_else(|| {
        stampede_metrics::Error::UnknownMetric(metrics.name(id).unwrap_or_default()).into()
    })
}

impl BuiltinMetrics {
    pub fn register(metrics: &Registry) -> Result<Self> {
        let iterations = metrics.register(ITERATIONS, MetricKind::Counter)?;
        let iteration_duration = metrics.register(ITERATION_DURATION, MetricKind::Histogram)?;
        let iteration_failed = metrics.register(ITERATION_FAILED, MetricKind::Rate)?;
        let vus = metrics.register(VUS, MetricKind::Gauge)?;
        let vus_max = metrics.register(VUS_MAX, MetricKind::Gauge)?;

        Ok(Self {
            iterations: handle(metrics, iterations)?,
            iteration_duration: handle(metrics, iteration_duration)?,
            iteration_failed: handle(metrics, iteration_failed)?,
            vus: handle(metrics, vus)?,
            vus_max: handle(metrics, vus_max)?,
            checks: metrics.register(CHECKS, MetricKind::Rate)?,
            http_reqs: metrics.register(HTTP_REQS, MetricKind::Counter)?,
            http_req_duration: metrics.register(HTTP_REQ_DURATION, MetricKind::Histogram)?,
            http_req_failed: metrics.register(HTTP_REQ_FAILED, MetricKind::Rate)?,
            data_received: metrics.register(DATA_RECEIVED, MetricKind::Counter)?,
        })
    }

    pub fn record_iteration(&self, duration: Duration, failed: bool) {
        self.iterations.increment(1);
        self.iteration_duration.observe(millis(duration));
        self.iteration_failed.add_rate(failed);
    }

    pub fn iterations_total(&self) -> u64 {
        self.iterations.get_counter()
    }

    pub fn record_check(&self, metrics: &Registry, name: &str, passed: bool) {
        let tags = metrics.resolve_tags(&[("check", name)]);
        if let Some(h) = metrics.get_handle(self.checks, tags) {
            h.add_rate(passed);
        }
    }

    pub fn record_request(&self, metrics: &Registry, sample: RequestSample<'_>) {
        let status = sample.status.map(|s| s.to_string());
        let mut tags: Vec<(&str, &str)> = vec![
            ("name", sample.name),
            ("method", sample.method),
            ("status", status.as_deref().unwrap_or("0")),
        ];
        if let Some(error) = sample.error {
            tags.push(("error", error));
        }
        let tags = metrics.resolve_tags(&tags);

        if let Some(h) = metrics.get_handle(self.http_reqs, tags.clone()) {
            h.increment(1);
        }
        if let Some(h) = metrics.get_handle(self.http_req_duration, tags.clone()) {
            h.observe(millis(sample.duration));
        }
        if let Some(h) = metrics.get_handle(self.http_req_failed, tags.clone()) {
            h.add_rate(sample.failed());
        }
        if let Some(h) = metrics.get_handle(self.data_received, tags) {
            h.increment(sample.bytes_received);
        }
    }

    /// Adjusts the running-VU gauge and raises the peak when needed.
    pub fn vu_started(&self) {
        let now = self.vus.add_gauge(1);
        self.vus_max.raise_gauge(now);
    }

    pub fn vu_stopped(&self) {
        self.vus.add_gauge(-1);
    }

    pub fn running_vus(&self) -> i64 {
        self.vus.get_gauge()
    }

    pub fn peak_vus(&self) -> i64 {
        self.vus_max.get_gauge()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stampede_metrics::MetricSnapshot;

    #[test]
    fn request_failure_follows_status() {
        let mut sample = RequestSample {
            name: "home",
            method: "GET",
            status: Some(200),
            duration: Duration::from_millis(5),
            bytes_received: 10,
            error: None,
        };
        assert!(!sample.failed());
        sample.status = Some(404);
        assert!(sample.failed());
        sample.status = None;
        assert!(sample.failed());
    }

    #[test]
    fn records_request_series() -> anyhow::Result<()> {
        let reg = Registry::default();
        let builtin = BuiltinMetrics::register(&reg)?;

        for status in [Some(200), Some(500), None] {
            builtin.record_request(
                &reg,
                RequestSample {
                    name: "home",
                    method: "GET",
                    status,
                    duration: Duration::from_millis(20),
                    bytes_received: 100,
                    error: status.is_none().then_some("timeout"),
                },
            );
        }

        let Some(MetricSnapshot::Counter(reqs)) = reg.snapshot(HTTP_REQS) else {
            panic!("expected counter");
        };
        assert_eq!(reqs, 3);
        let Some(MetricSnapshot::Rate(failed)) = reg.snapshot(HTTP_REQ_FAILED) else {
            panic!("expected rate");
        };
        assert_eq!((failed.total, failed.hits), (3, 2));
        let Some(MetricSnapshot::Counter(bytes)) = reg.snapshot(DATA_RECEIVED) else {
            panic!("expected counter");
        };
        assert_eq!(bytes, 300);
        let Some(MetricSnapshot::Histogram(h)) = reg.snapshot(HTTP_REQ_DURATION) else {
            panic!("expected histogram");
        };
        assert_eq!(h.count(), 3);
        Ok(())
    }

    #[test]
    fn vus_gauges_track_peak() -> anyhow::Result<()> {
        let reg = Registry::default();
        let builtin = BuiltinMetrics::register(&reg)?;

        builtin.vu_started();
        builtin.vu_started();
        builtin.vu_stopped();
        builtin.vu_started();
        builtin.vu_started();
        builtin.vu_stopped();

        assert_eq!(builtin.running_vus(), 2);
        assert_eq!(builtin.peak_vus(), 3);
        Ok(())
    }
}
