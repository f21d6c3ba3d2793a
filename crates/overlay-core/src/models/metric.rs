//! Metric values produced by the overlay engine.
//!
//! Every metric serializes as `{"type": "...", "value": ...}` so that partial
//! results can be stored and later recombined.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::feature::Properties;
use super::layers::GeographyId;
use crate::unique_ids::UniqueIdIndex;

/// Histogram entry `[value, count]`
pub type HistogramEntry = (f64, f64);

/// Values keyed by a group key, `"*"` being the ungrouped total
pub type GroupedValues<T> = BTreeMap<String, T>;

/// Key used for the ungrouped total
pub const TOTAL_GROUP_KEY: &str = "*";

/// Summary statistics for a single raster band
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterBandStats {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub range: f64,
    pub histogram: Vec<HistogramEntry>,
    pub invalid: u64,
    pub sum: f64,
}

impl RasterBandStats {
    /// Zeroed band used when a raster has no values under the subject
    pub fn empty() -> Self {
        Self {
            count: 0,
            min: 0.0,
            max: 0.0,
            mean: f64::NAN,
            median: f64::NAN,
            range: 0.0,
            histogram: Vec::new(),
            invalid: 0,
            sum: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterStatsValue {
    pub bands: Vec<RasterBandStats>,
}

/// Statistics for a numeric attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NumberColumnValueStats {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
    pub histogram: Vec<HistogramEntry>,
    pub count_distinct: usize,
    pub sum: f64,
    /// Overlap area used as the weight for this partial
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_area_sq_km: Option<f64>,
}

/// Distinct value counts for string and boolean attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistinctValueStats {
    pub distinct_values: Vec<(Value, f64)>,
    pub count_distinct: usize,
}

/// Per-attribute statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ColumnValueStats {
    Number(NumberColumnValueStats),
    String(DistinctValueStats),
    Boolean(DistinctValueStats),
}

impl ColumnValueStats {
    pub fn is_number(&self) -> bool {
        matches!(self, ColumnValueStats::Number(_))
    }
}

/// Raw `[value, weight]` samples collected per group and attribute
pub type ColumnValueSamples = GroupedValues<BTreeMap<String, Vec<(Value, Option<f64>)>>>;

/// Deduplicated feature count
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountValue {
    pub count: u64,
    pub unique_id_index: UniqueIdIndex,
}

/// Rows of features present under the subject
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceTableValue {
    pub values: Vec<Properties>,
    pub exceeded_limit: bool,
}

impl PresenceTableValue {
    /// Deduplication key of a row: its `__id`, or the whole row when it has none
    pub fn row_key(row: &Properties) -> String {
        match row.get("__id") {
            Some(id) => format!("id:{id}"),
            None => format!("row:{}", Value::Object(row.clone())),
        }
    }

    /// Cap the table at `limit` rows. Reaching the cap sets `exceeded_limit`.
    pub fn apply_limit(&mut self, limit: usize) {
        if self.values.len() >= limit {
            self.exceeded_limit = true;
            self.values.truncate(limit);
        }
    }
}

/// Closest distance from the subject to a shoreline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistanceToShore {
    pub meters: f64,
    /// GeoJSON line from the subject to the shoreline, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Value>,
}

/// A metric value tagged by operation type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Metric {
    TotalArea(f64),
    OverlayArea(GroupedValues<f64>),
    Count(GroupedValues<CountValue>),
    Presence(bool),
    PresenceTable(PresenceTableValue),
    ColumnValues(GroupedValues<BTreeMap<String, ColumnValueStats>>),
    RasterStats(RasterStatsValue),
    DistanceToShore(DistanceToShore),
}

impl Metric {
    pub fn type_name(&self) -> &'static str {
        match self {
            Metric::TotalArea(_) => "total_area",
            Metric::OverlayArea(_) => "overlay_area",
            Metric::Count(_) => "count",
            Metric::Presence(_) => "presence",
            Metric::PresenceTable(_) => "presence_table",
            Metric::ColumnValues(_) => "column_values",
            Metric::RasterStats(_) => "raster_stats",
            Metric::DistanceToShore(_) => "distance_to_shore",
        }
    }
}

/// What a metric was computed for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricSubject {
    /// A sketch fragment, identified by its geometry hash
    Fragment { hash: String, geographies: Vec<GeographyId> },
    /// A whole geography
    Geography { id: GeographyId },
}

/// A metric together with its subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectMetric {
    pub subject: MetricSubject,
    pub metric: Metric,
}
