use std::sync::Arc;
use std::time::Duration;

use stampede_http::{HttpClient, HttpRequest, HttpResponse};
use stampede_metrics::{MetricSample, Registry};
use tokio::time::Instant;

use crate::metrics::{BuiltinMetrics, RequestSample};

#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) registry: Arc<Registry>,
    pub(crate) builtin: BuiltinMetrics,
    pub(crate) client: HttpClient,
}

/// Handle a scenario uses during one iteration to talk to the target and to the
/// metrics collector.
#[derive(Debug, Clone)]
pub struct IterationContext {
    vu_id: u64,
    iteration: u64,
    shared: Arc<Shared>,
}

impl IterationContext {
    pub(crate) fn new(vu_id: u64, iteration: u64, shared: Arc<Shared>) -> Self {
        Self {
            vu_id,
            iteration,
            shared,
        }
    }

    /// 1-based, unique within a run.
    pub fn vu_id(&self) -> u64 {
        self.vu_id
    }

    /// 0-based iteration number of this virtual user.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn registry(&self) -> &Registry {
        &self.shared.registry
    }

    pub fn http(&self) -> &HttpClient {
        &self.shared.client
    }

    /// Records a `checks` sample tagged `check=<name>` and returns `passed`.
    ///
    /// A failed check is not an iteration error.
    pub fn check(&self, name: &str, passed: bool) -> bool {
        self.shared
            .builtin
            .record_check(&self.shared.registry, name, passed);
        passed
    }

    pub fn record_request(&self, sample: RequestSample<'_>) {
        self.shared
            .builtin
            .record_request(&self.shared.registry, sample);
    }

    /// Records a custom sample; the metric must be registered beforehand.
    pub fn record(&self, sample: &MetricSample) -> stampede_metrics::Result<()> {
        self.shared.registry.record(sample)
    }

    /// Sends `req` through the shared client and records the `http_*` metrics,
    /// tagged with `name`.
    pub async fn request(&self, name: &str, req: HttpRequest) -> stampede_http::Result<HttpResponse> {
        let method = req.method.to_string();
        let started = Instant::now();
        let result = self.shared.client.request(req).await;

        let (status, duration, bytes_received, error) = match &result {
            Ok(res) => (Some(res.status), res.elapsed, res.body.len() as u64, None),
            Err(err) => (
                None,
                started.elapsed(),
                0,
                Some(err.transport_error_kind().to_string()),
            ),
        };
        self.record_request(RequestSample {
            name,
            method: &method,
            status,
            duration,
            bytes_received,
            error: error.as_deref(),
        });

        result
    }

    /// Pauses inside the iteration, like a scripted `sleep`.
    pub async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
