pub mod key;
pub mod metrics;
pub mod query;
pub mod registry;
pub mod sample;
pub mod tags;

pub use key::KeyId;
pub use metrics::{
    HISTOGRAM_RELATIVE_ERROR, HISTOGRAM_SCALE, HISTOGRAM_SIGNIFICANT_DIGITS, HistogramSeries,
    HistogramSummary, MetricHandle, MetricKind, MetricSeriesSummary, MetricSnapshot, MetricValue,
    RateCounts,
};
pub use query::Query;
pub use registry::{Error, MetricId, Registry, Result};
pub use sample::MetricSample;
pub use tags::TagSet;
