pub mod envelope;
pub mod feature;
pub mod geometry;
pub mod layers;
pub mod metric;

pub use envelope::{BBox, Envelope};
pub use feature::{pick_properties, Feature, FeatureReference, Properties, SourceFeature};
pub use geometry::{Geometry, GeometryType};
pub use layers::{ClippingLayerOption, ClippingOperation, GeographyId, GeographySettings};
pub use metric::{
    ColumnValueSamples, ColumnValueStats, CountValue, DistanceToShore, DistinctValueStats,
    GroupedValues, HistogramEntry, Metric, MetricSubject, NumberColumnValueStats,
    PresenceTableValue, RasterBandStats, RasterStatsValue, SubjectMetric, TOTAL_GROUP_KEY,
};
