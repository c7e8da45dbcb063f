use std::time::Duration;

use rand::Rng as _;

use crate::error::{Error, Result};

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// One segment of the concurrency timeline: ramp linearly to `target` over `duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: u64,
}

impl Stage {
    pub fn new(duration: Duration, target: u64) -> Self {
        Self { duration, target }
    }
}

/// Pause a virtual user takes between iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThinkTime {
    #[default]
    None,
    Fixed(Duration),
    Uniform {
        min: Duration,
        max: Duration,
    },
}

impl ThinkTime {
    pub fn sample(&self) -> Duration {
        match *self {
            Self::None => Duration::ZERO,
            Self::Fixed(d) => d,
            Self::Uniform { min, max } if min >= max => min,
            Self::Uniform { min, max } => rand::thread_rng().gen_range(min..=max),
        }
    }

    fn validate(&self) -> Result<()> {
        match *self {
            Self::Uniform { min, max } if min > max => Err(Error::InvalidThinkTime { min, max }),
            _ => Ok(()),
        }
    }
}

/// Pass/fail criterion on an aggregated metric, e.g. `p(95) < 500` on `http_req_duration`.
///
/// `metric` may carry a tag selector: `checks{check:status is 200}`.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdConfig {
    pub metric: String,
    pub expression: String,
    /// Stop the run as soon as this threshold fails.
    pub abort_on_fail: bool,
    /// Minimum run time before an abort-on-fail threshold may stop the run.
    pub abort_grace: Option<Duration>,
}

impl ThresholdConfig {
    pub fn new(metric: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
            expression: expression.into(),
            abort_on_fail: false,
            abort_grace: None,
        }
    }

    #[must_use]
    pub fn abort_on_fail(mut self) -> Self {
        self.abort_on_fail = true;
        self
    }

    #[must_use]
    pub fn with_abort_grace(mut self, grace: Duration) -> Self {
        self.abort_grace = Some(grace);
        self
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub stages: Vec<Stage>,
    /// Concurrency the first stage ramps from.
    pub start_vus: u64,
    pub think_time: ThinkTime,
    pub thresholds: Vec<ThresholdConfig>,
    pub tick_interval: Duration,
    /// How long stopping workers may finish in-flight iterations before they are aborted.
    pub grace_period: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            stages: Vec::new(),
            start_vus: 0,
            think_time: ThinkTime::None,
            thresholds: Vec::new(),
            tick_interval: DEFAULT_TICK_INTERVAL,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

impl RunOptions {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self {
            stages,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_start_vus(mut self, start_vus: u64) -> Self {
        self.start_vus = start_vus;
        self
    }

    #[must_use]
    pub fn with_think_time(mut self, think_time: ThinkTime) -> Self {
        self.think_time = think_time;
        self
    }

    #[must_use]
    pub fn with_threshold(mut self, threshold: ThresholdConfig) -> Self {
        self.thresholds.push(threshold);
        self
    }

    #[must_use]
    pub fn with_tick_interval(mut self, tick: Duration) -> Self {
        self.tick_interval = tick;
        self
    }

    #[must_use]
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    pub fn total_duration(&self) -> Duration {
        self.stages
            .iter()
            .fold(Duration::ZERO, |acc, s| acc.saturating_add(s.duration))
    }

    /// Structural checks. Threshold expressions are parsed separately against the
    /// metrics registry.
    pub fn validate(&self) -> Result<()> {
        if self.stages.is_empty() {
            return Err(Error::InvalidStages);
        }
        if self.total_duration().is_zero() {
            return Err(Error::ZeroDuration);
        }
        if self.tick_interval.is_zero() {
            return Err(Error::InvalidTickInterval);
        }
        self.think_time.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_empty_and_zero_length_timelines() {
        let err = RunOptions::default().validate();
        assert!(matches!(err, Err(Error::InvalidStages)));

        let err = RunOptions::new(vec![Stage::new(Duration::ZERO, 10)]).validate();
        assert!(matches!(err, Err(Error::ZeroDuration)));

        let ok = RunOptions::new(vec![
            Stage::new(Duration::ZERO, 10),
            Stage::new(Duration::from_secs(1), 10),
        ])
        .validate();
        assert!(ok.is_ok());
    }

    #[test]
    fn validate_rejects_inverted_think_time_range() {
        let opts = RunOptions::new(vec![Stage::new(Duration::from_secs(1), 1)]).with_think_time(
            ThinkTime::Uniform {
                min: Duration::from_secs(3),
                max: Duration::from_secs(1),
            },
        );
        assert!(matches!(
            opts.validate(),
            Err(Error::InvalidThinkTime { .. })
        ));
    }

    #[test]
    fn validate_rejects_zero_tick() {
        let opts = RunOptions::new(vec![Stage::new(Duration::from_secs(1), 1)])
            .with_tick_interval(Duration::ZERO);
        assert!(matches!(opts.validate(), Err(Error::InvalidTickInterval)));
    }

    #[test]
    fn uniform_think_time_stays_in_range() {
        let think = ThinkTime::Uniform {
            min: Duration::from_secs(1),
            max: Duration::from_secs(3),
        };
        for _ in 0..200 {
            let d = think.sample();
            assert!(d >= Duration::from_secs(1) && d <= Duration::from_secs(3));
        }
        assert_eq!(ThinkTime::None.sample(), Duration::ZERO);
        assert_eq!(
            ThinkTime::Fixed(Duration::from_millis(5)).sample(),
            Duration::from_millis(5)
        );
    }
}
