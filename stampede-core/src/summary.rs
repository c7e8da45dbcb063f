use std::time::Duration;

use stampede_metrics::{MetricSeriesSummary, MetricSnapshot, Registry};

use crate::metrics::CHECKS;
use crate::thresholds::{ThresholdResult, Verdict};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum RunStatus {
    Running,
    Passed,
    Failed,
    Aborted,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AbortReason {
    /// An abort-on-fail threshold failed mid-run.
    Threshold {
        metric: String,
        expression: String,
        observed: f64,
    },
    Cancelled,
    /// Workers were still busy when the grace period ended.
    GraceExceeded { forced: u64 },
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Threshold {
                metric,
                expression,
                observed,
            } => write!(f, "threshold `{metric}: {expression}` failed (observed {observed})"),
            Self::Cancelled => f.write_str("run cancelled"),
            Self::GraceExceeded { forced } => {
                write!(f, "{forced} virtual user(s) aborted after the grace period")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckSummary {
    pub name: String,
    pub passes: u64,
    pub fails: u64,
}

pub(crate) fn check_summaries(registry: &Registry) -> Vec<CheckSummary> {
    let Some((id, _)) = registry.lookup_metric(CHECKS) else {
        return Vec::new();
    };
    registry
        .query(id)
        .where_has("check")
        .group_by(&["check"])
        .merge_grouped()
        .into_iter()
        .filter_map(|(tags, snapshot)| {
            let MetricSnapshot::Rate(r) = snapshot else {
                return None;
            };
            let (_, name) = tags.into_iter().next()?;
            Some(CheckSummary {
                name,
                passes: r.hits,
                fails: r.total.saturating_sub(r.hits),
            })
        })
        .collect()
}

/// Outcome of a finished run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub status: RunStatus,
    pub abort_reason: Option<AbortReason>,
    pub duration: Duration,
    /// Value of the `iterations` counter.
    pub iterations: u64,
    /// Sum of the per-worker iteration counts; equals `iterations` unless workers
    /// were aborted.
    pub vu_iterations: u64,
    pub vus_spawned: u64,
    pub vus_max: u64,
    pub forced_stops: u64,
    pub thresholds: Vec<ThresholdResult>,
    pub checks: Vec<CheckSummary>,
    /// One merged summary per metric, sorted by name.
    pub metrics: Vec<MetricSeriesSummary>,
    pub teardown_error: Option<String>,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        self.status == RunStatus::Passed
    }

    pub fn failed_thresholds(&self) -> impl Iterator<Item = &ThresholdResult> {
        self.thresholds.iter().filter(|t| !t.verdict.is_pass())
    }

    pub fn metric(&self, name: &str) -> Option<&MetricSeriesSummary> {
        self.metrics.iter().find(|m| m.name == name)
    }
}

/// Aborted wins over Failed; NoData counts as not passed.
pub fn final_status(abort: Option<&AbortReason>, thresholds: &[ThresholdResult]) -> RunStatus {
    if abort.is_some() {
        return RunStatus::Aborted;
    }
    if thresholds
        .iter()
        .any(|t| matches!(t.verdict, Verdict::Fail { .. } | Verdict::NoData))
    {
        return RunStatus::Failed;
    }
    RunStatus::Passed
}
