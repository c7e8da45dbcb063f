use std::time::SystemTime;

/// One observation emitted by a virtual user.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub name: String,
    pub value: f64,
    pub tags: Vec<(String, String)>,
    pub timestamp: SystemTime,
}

impl MetricSample {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            tags: Vec::new(),
            timestamp: SystemTime::now(),
        }
    }

    /// Rate sample: `true` counts as a hit.
    pub fn flag(name: impl Into<String>, hit: bool) -> Self {
        Self::new(name, if hit { 1.0 } else { 0.0 })
    }

    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: SystemTime) -> Self {
        self.timestamp = timestamp;
        self
    }
}
