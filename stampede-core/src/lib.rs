#![forbid(unsafe_code)]

mod config;
mod context;
mod error;
mod executor;
pub mod metrics;
mod pool;
mod progress;
mod run;
mod scenario;
mod schedule;
mod summary;
mod thresholds;

pub use config::{
    DEFAULT_GRACE_PERIOD, DEFAULT_TICK_INTERVAL, RunOptions, Stage, ThinkTime, ThresholdConfig,
};
pub use context::IterationContext;
pub use error::{Error, Result};
pub use executor::{Executor, IterationOutcome};
pub use metrics::{BuiltinMetrics, RequestSample};
pub use pool::{PoolCounts, ShutdownReport, VirtualUserPool, VuState};
pub use progress::{ProgressFn, ProgressUpdate};
pub use run::{Runner, run};
pub use scenario::{Scenario, ScenarioFn, scenario_fn};
pub use schedule::{StageScheduler, StageSnapshot};
pub use summary::{AbortReason, CheckSummary, RunReport, RunStatus, final_status};
pub use thresholds::{
    Threshold, ThresholdAgg, ThresholdExpr, ThresholdOp, ThresholdResult, Verdict,
    evaluate_thresholds, parse_threshold_expr, parse_thresholds,
};
