pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("`stages` must be a non-empty array of {{ duration, target }}")]
    InvalidStages,

    #[error("`stages` must add up to a positive total duration")]
    ZeroDuration,

    #[error("`tick_interval` must be a positive duration")]
    InvalidTickInterval,

    #[error("invalid think time: `min` ({min:?}) must not exceed `max` ({max:?})")]
    InvalidThinkTime {
        min: std::time::Duration,
        max: std::time::Duration,
    },

    #[error("invalid threshold `{expression}` on `{metric}`: {reason}")]
    InvalidThreshold {
        metric: String,
        expression: String,
        reason: String,
    },

    #[error("metrics error: {0}")]
    Metrics(#[from] stampede_metrics::Error),

    #[error("scenario setup failed: {0}")]
    Setup(String),

    #[error("scenario teardown failed: {0}")]
    Teardown(String),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl Error {
    /// Errors raised before any virtual user starts.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::InvalidStages
                | Self::ZeroDuration
                | Self::InvalidTickInterval
                | Self::InvalidThinkTime { .. }
                | Self::InvalidThreshold { .. }
        )
    }
}
