use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt as _;
use futures::future;
use stampede_http::HttpClient;
use stampede_metrics::Registry;
use tokio::time::Instant;

use crate::context::{IterationContext, Shared};
use crate::error::Result;
use crate::metrics::BuiltinMetrics;
use crate::scenario::Scenario;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationOutcome {
    Completed { duration: Duration },
    Failed { duration: Duration, error: String },
    Panicked { duration: Duration, message: String },
}

impl IterationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    pub fn duration(&self) -> Duration {
        match self {
            Self::Completed { duration }
            | Self::Failed { duration, .. }
            | Self::Panicked { duration, .. } => *duration,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Runs single iterations and records their outcome. Stateless apart from the
/// shared metric handles, so clones are interchangeable.
#[derive(Debug, Clone)]
pub struct Executor {
    shared: Arc<Shared>,
}

impl Executor {
    /// Registers the built-in metrics in `registry`.
    pub fn new(registry: Arc<Registry>, client: HttpClient) -> Result<Self> {
        let builtin = BuiltinMetrics::register(&registry)?;
        Ok(Self {
            shared: Arc::new(Shared {
                registry,
                builtin,
                client,
            }),
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.shared.registry
    }

    pub fn builtin(&self) -> &BuiltinMetrics {
        &self.shared.builtin
    }

    pub fn context(&self, vu_id: u64, iteration: u64) -> IterationContext {
        IterationContext::new(vu_id, iteration, self.shared.clone())
    }

    /// Invokes the scenario once. Errors and panics are caught and recorded as an
    /// `iteration_failed` hit; they never propagate to the caller.
    pub async fn run_iteration<S: Scenario>(
        &self,
        scenario: &S,
        ctx: IterationContext,
    ) -> IterationOutcome {
        let vu_id = ctx.vu_id();
        let started = Instant::now();
        // `run` itself may panic before it hands back a future.
        let result = AssertUnwindSafe(future::lazy(|_| scenario.run(ctx)).flatten())
            .catch_unwind()
            .await;
        let duration = started.elapsed();

        let outcome = match result {
            Ok(Ok(())) => IterationOutcome::Completed { duration },
            Ok(Err(err)) => {
                let error = format!("{err:#}");
                tracing::debug!(vu_id, %error, "iteration failed");
                IterationOutcome::Failed { duration, error }
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::debug!(vu_id, %message, "iteration panicked");
                IterationOutcome::Panicked { duration, message }
            }
        };

        self.shared
            .builtin
            .record_iteration(duration, !outcome.is_success());
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{CHECKS, ITERATION_DURATION, ITERATION_FAILED, ITERATIONS};
    use crate::scenario::scenario_fn;
    use stampede_metrics::MetricSnapshot;

    fn executor() -> Executor {
        Executor::new(Arc::new(Registry::default()), HttpClient::default())
            .unwrap_or_else(|e| panic!("{e}"))
    }

    fn rate(exec: &Executor, name: &str) -> (u64, u64) {
        let Some(MetricSnapshot::Rate(r)) = exec.registry().snapshot(name) else {
            panic!("expected rate `{name}`");
        };
        (r.total, r.hits)
    }

    #[tokio::test(start_paused = true)]
    async fn successful_iteration_records_duration_and_count() {
        let exec = executor();
        let scenario = scenario_fn(|ctx: IterationContext| async move {
            ctx.sleep(Duration::from_millis(250)).await;
            ctx.check("always", true);
            anyhow::Ok(())
        });

        let outcome = exec.run_iteration(&scenario, exec.context(1, 0)).await;
        assert_eq!(
            outcome,
            IterationOutcome::Completed {
                duration: Duration::from_millis(250)
            }
        );

        assert_eq!(exec.builtin().iterations_total(), 1);
        assert_eq!(rate(&exec, ITERATION_FAILED), (1, 0));
        assert_eq!(rate(&exec, CHECKS), (1, 1));
        let Some(MetricSnapshot::Histogram(h)) = exec.registry().snapshot(ITERATION_DURATION)
        else {
            panic!("expected histogram");
        };
        assert_eq!(h.min(), Some(250.0));
    }

    #[tokio::test]
    async fn errors_and_panics_are_contained() {
        let exec = executor();

        let failing = scenario_fn(|_ctx| async { anyhow::Result::<()>::Err(anyhow::anyhow!("boom")) });
        let outcome = exec.run_iteration(&failing, exec.context(1, 0)).await;
        assert!(matches!(outcome, IterationOutcome::Failed { ref error, .. } if error == "boom"));

        let panicking = scenario_fn(|ctx: IterationContext| async move {
            if ctx.iteration() == 0 {
                panic!("kaboom");
            }
            anyhow::Ok(())
        });
        let outcome = exec.run_iteration(&panicking, exec.context(2, 0)).await;
        assert!(
            matches!(outcome, IterationOutcome::Panicked { ref message, .. } if message == "kaboom")
        );

        let outcome = exec.run_iteration(&panicking, exec.context(2, 1)).await;
        assert!(outcome.is_success());

        let Some(MetricSnapshot::Counter(n)) = exec.registry().snapshot(ITERATIONS) else {
            panic!("expected counter");
        };
        assert_eq!(n, 3);
        assert_eq!(rate(&exec, ITERATION_FAILED), (3, 2));
    }

    #[tokio::test]
    async fn panic_before_the_future_is_built_is_contained() {
        let exec = executor();
        let scenario = scenario_fn(|ctx: IterationContext| {
            if ctx.iteration() == 0 {
                panic!("prologue");
            }
            async { anyhow::Ok(()) }
        });

        let outcome = exec.run_iteration(&scenario, exec.context(1, 0)).await;
        assert!(
            matches!(outcome, IterationOutcome::Panicked { ref message, .. } if message == "prologue")
        );
        let outcome = exec.run_iteration(&scenario, exec.context(1, 1)).await;
        assert!(outcome.is_success());

        assert_eq!(exec.builtin().iterations_total(), 2);
        assert_eq!(rate(&exec, ITERATION_FAILED), (2, 1));
    }

    #[tokio::test]
    async fn failed_check_does_not_fail_the_iteration() {
        let exec = executor();
        let scenario = scenario_fn(|ctx: IterationContext| async move {
            ctx.check("status is 200", false);
            anyhow::Ok(())
        });

        let outcome = exec.run_iteration(&scenario, exec.context(1, 0)).await;
        assert!(outcome.is_success());
        assert_eq!(rate(&exec, CHECKS), (1, 0));
        assert_eq!(rate(&exec, ITERATION_FAILED), (1, 0));
    }
}
