use std::sync::Arc;
use std::time::Duration;

use stampede_http::HttpClient;
use stampede_metrics::Registry;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::RunOptions;
use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::pool::VirtualUserPool;
use crate::progress::{ProgressFn, ProgressUpdate};
use crate::scenario::Scenario;
use crate::schedule::StageScheduler;
use crate::summary::{AbortReason, RunReport, check_summaries, final_status};
use crate::thresholds::{Threshold, ThresholdResult, Verdict, evaluate_thresholds, parse_thresholds};

fn abort_reason(
    thresholds: &[Threshold],
    results: &[ThresholdResult],
    elapsed: Duration,
) -> Option<AbortReason> {
    thresholds
        .iter()
        .zip(results)
        .find_map(|(t, r)| match r.verdict {
            Verdict::Fail { observed } if t.may_abort_at(elapsed) => Some(AbortReason::Threshold {
                metric: r.metric.clone(),
                expression: r.expression.clone(),
                observed,
            }),
            _ => None,
        })
}

/// Drives one test run: schedule, pool, threshold checks, shutdown and report.
pub struct Runner<S> {
    scenario: Arc<S>,
    options: RunOptions,
    registry: Arc<Registry>,
    client: Option<HttpClient>,
    cancel: CancellationToken,
    progress: Option<ProgressFn>,
}

impl<S: Scenario> Runner<S> {
    pub fn new(scenario: S, options: RunOptions) -> Self {
        Self {
            scenario: Arc::new(scenario),
            options,
            registry: Arc::new(Registry::default()),
            client: None,
            cancel: CancellationToken::new(),
            progress: None,
        }
    }

    /// Uses `registry` for every sample of the run, e.g. one holding custom metrics.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = registry;
        self
    }

    #[must_use]
    pub fn with_client(mut self, client: HttpClient) -> Self {
        self.client = Some(client);
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Cancelling the token stops the run gracefully; its status becomes `Aborted`.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub async fn run(self) -> Result<RunReport> {
        self.options.validate()?;
        let scheduler = StageScheduler::new(self.options.start_vus, self.options.stages.clone())?;
        let executor = Executor::new(
            self.registry.clone(),
            self.client.clone().unwrap_or_default(),
        )?;
        let thresholds = parse_thresholds(&self.options.thresholds, &self.registry)?;

        self.scenario
            .setup()
            .await
            .map_err(|err| Error::Setup(format!("{err:#}")))?;

        tracing::info!(
            stages = scheduler.stages().len(),
            total_duration = ?scheduler.total_duration(),
            max_vus = scheduler.max_target(),
            thresholds = thresholds.len(),
            "run started"
        );

        let mut pool = VirtualUserPool::new(
            self.scenario.clone(),
            executor.clone(),
            self.options.think_time,
            self.cancel.clone(),
        );

        let started = Instant::now();
        let end = started + scheduler.total_duration();
        let mut interval = tokio::time::interval(self.options.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut abort: Option<AbortReason> = None;
        let mut tick: u64 = 0;
        let mut stage_index: Option<usize> = None;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    tracing::warn!(elapsed = ?started.elapsed(), "run cancelled");
                    abort = Some(AbortReason::Cancelled);
                    break;
                }
                _ = tokio::time::sleep_until(end) => break,
                _ = interval.tick() => {}
            }

            let elapsed = started.elapsed();
            if scheduler.is_done(elapsed) {
                break;
            }

            let target = scheduler.target_concurrency(elapsed);
            pool.reconcile(target);

            let stage = scheduler.stage_snapshot_at(elapsed);
            if stage_index != Some(stage.index) {
                tracing::debug!(
                    stage = stage.index + 1,
                    stages = stage.count,
                    start_target = stage.start_target,
                    end_target = stage.end_target,
                    "entered stage"
                );
                stage_index = Some(stage.index);
            }

            let results = evaluate_thresholds(&thresholds, &self.registry);
            if let Some(reason) = abort_reason(&thresholds, &results, elapsed) {
                tracing::warn!(%reason, ?elapsed, "aborting run");
                abort = Some(reason);
                break;
            }

            if let Some(progress) = &self.progress {
                tick = tick.saturating_add(1);
                (progress)(ProgressUpdate {
                    tick,
                    elapsed,
                    total_duration: scheduler.total_duration(),
                    stage,
                    target_vus: target,
                    active_vus: pool.active(),
                    iterations: pool.iterations(),
                });
            }
        }

        let vus_spawned = pool.spawned();
        let shutdown = pool.shutdown(self.options.grace_period).await;
        if shutdown.forced > 0 && abort.is_none() {
            abort = Some(AbortReason::GraceExceeded {
                forced: shutdown.forced,
            });
        }

        let teardown_error = match self.scenario.teardown().await {
            Ok(()) => None,
            Err(err) => {
                let error = format!("{err:#}");
                tracing::warn!(%error, "scenario teardown failed");
                Some(error)
            }
        };

        let results = evaluate_thresholds(&thresholds, &self.registry);
        let status = final_status(abort.as_ref(), &results);
        let duration = started.elapsed();

        tracing::info!(
            %status,
            ?duration,
            iterations = executor.builtin().iterations_total(),
            forced = shutdown.forced,
            "run finished"
        );

        Ok(RunReport {
            status,
            abort_reason: abort,
            duration,
            iterations: executor.builtin().iterations_total(),
            vu_iterations: shutdown.iterations,
            vus_spawned,
            vus_max: executor.builtin().peak_vus().max(0) as u64,
            forced_stops: shutdown.forced,
            thresholds: results,
            checks: check_summaries(&self.registry),
            metrics: self.registry.summarize(),
            teardown_error,
        })
    }
}

/// Shorthand for `Runner::new(scenario, options).run()`.
pub async fn run<S: Scenario>(scenario: S, options: RunOptions) -> Result<RunReport> {
    Runner::new(scenario, options).run().await
}
