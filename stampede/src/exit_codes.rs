use stampede_core::RunStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,

    /// One or more thresholds failed (or never received data).
    ThresholdsFailed = 11,

    /// The run stopped early: abort-on-fail threshold, Ctrl-C, or workers aborted after the grace period.
    Aborted = 12,

    /// Scenario setup or teardown failed.
    ScenarioError = 20,

    /// Invalid CLI flags or scenario file (bad durations, stages, threshold syntax, etc.).
    InvalidInput = 30,

    /// Internal/runtime error (IO errors, unexpected invariants).
    RuntimeError = 40,
}

impl ExitCode {
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    #[must_use]
    pub fn from_status(status: RunStatus) -> Self {
        match status {
            RunStatus::Passed => Self::Success,
            RunStatus::Failed => Self::ThresholdsFailed,
            RunStatus::Aborted => Self::Aborted,
            RunStatus::Running => Self::RuntimeError,
        }
    }
}
