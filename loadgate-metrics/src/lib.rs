pub mod key;
pub mod metrics;
pub mod registry;
pub mod snapshot;
pub mod tags;

pub use key::KeyId;
pub use metrics::{
    HistogramSummary, MetricKind, MetricSeriesSummary, MetricValue, SeriesValue, Unit,
};
pub use registry::{MetricDef, MetricId, Registry, ShardWriter};
pub use snapshot::{SeriesSnapshot, Snapshot};
pub use tags::TagSet;
