//! Messages exchanged between a processor and the worker pool

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use geo::MultiPolygon;
use overlay_core::models::{ColumnValueSamples, GroupedValues, PresenceTableValue, SourceFeature};
use overlay_core::{OverlayError, Result};
use serde::{Deserialize, Serialize};

/// Overlay operation computed by a batch processor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    OverlayArea,
    Count,
    Presence,
    PresenceTable,
    ColumnValues,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::OverlayArea => "overlay_area",
            Operation::Count => "count",
            Operation::Presence => "presence",
            Operation::PresenceTable => "presence_table",
            Operation::ColumnValues => "column_values",
        }
    }

    /// Whether features straddling the subject boundary must be clipped
    /// before they can contribute
    pub fn clips_mixed_features(&self) -> bool {
        matches!(self, Operation::OverlayArea | Operation::ColumnValues)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A feature deferred to a worker, with the geometry work it still needs
#[derive(Debug, Clone, PartialEq)]
pub struct BatchFeature {
    pub feature: SourceFeature,
    pub requires_intersection: bool,
    pub requires_difference: bool,
}

/// Per-calculation options shared by every batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationOptions {
    pub group_by: Option<String>,
    /// Properties copied into presence table rows; all public ones when `None`
    pub included_properties: Option<Vec<String>>,
    pub results_limit: usize,
    /// Column read by `column_values`
    pub property: Option<String>,
}

/// One batch of work
#[derive(Debug, Clone)]
pub struct WorkerRequest {
    pub operation: Operation,
    pub features: Vec<BatchFeature>,
    /// Union of the difference polygons relevant to this batch
    pub difference: MultiPolygon<f64>,
    pub subject: Arc<MultiPolygon<f64>>,
    pub options: Arc<OperationOptions>,
}

/// Partial result of one batch, merged by the processor
#[derive(Debug, Clone, PartialEq)]
pub enum BatchResult {
    OverlayArea(GroupedValues<f64>),
    /// Feature ids per group
    Count(BTreeMap<String, Vec<i64>>),
    Presence(bool),
    PresenceTable(PresenceTableValue),
    ColumnValues(ColumnValueSamples),
}

/// Reply sent back for every submitted request
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerResponse {
    Ok(BatchResult),
    /// The job ran and returned an error
    Error { message: String },
    /// The worker panicked while running the job
    Crashed { worker_id: usize },
}

impl WorkerResponse {
    pub fn into_result(self) -> Result<BatchResult> {
        match self {
            WorkerResponse::Ok(result) => Ok(result),
            WorkerResponse::Error { message } => Err(OverlayError::WorkerFailed { message }),
            WorkerResponse::Crashed { worker_id } => Err(OverlayError::WorkerCrashed { worker_id }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_names() {
        assert_eq!(Operation::PresenceTable.as_str(), "presence_table");
        assert_eq!(serde_json::to_value(Operation::ColumnValues).unwrap(), "column_values");
        assert!(Operation::OverlayArea.clips_mixed_features());
        assert!(!Operation::Count.clips_mixed_features());
    }

    #[test]
    fn test_response_into_result() {
        let ok = WorkerResponse::Ok(BatchResult::Presence(true)).into_result();
        assert_eq!(ok.unwrap(), BatchResult::Presence(true));

        let failed = WorkerResponse::Error { message: "bad".into() }.into_result();
        assert!(matches!(failed, Err(OverlayError::WorkerFailed { message }) if message == "bad"));

        let crashed = WorkerResponse::Crashed { worker_id: 3 }.into_result();
        assert!(matches!(crashed, Err(OverlayError::WorkerCrashed { worker_id: 3 })));
    }
}
