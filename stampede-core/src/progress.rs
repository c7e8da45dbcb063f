use std::time::Duration;

use crate::schedule::StageSnapshot;

#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// Monotonic tick counter (1-based).
    pub tick: u64,
    pub elapsed: Duration,
    pub total_duration: Duration,
    pub stage: StageSnapshot,
    /// Concurrency requested by the schedule at this tick.
    pub target_vus: u64,
    /// Workers not asked to stop.
    pub active_vus: u64,
    pub iterations: u64,
}

pub type ProgressFn = std::sync::Arc<dyn Fn(ProgressUpdate) + Send + Sync + 'static>;
