//! Area-only batch processor.
//!
//! A narrower sibling of [`OverlayEngineBatchProcessor`](crate::processor::OverlayEngineBatchProcessor)
//! that only reports overlap area or a plain feature count per group. Features
//! fully inside the subject use their precomputed `__area` property when the
//! source provides one.

use std::sync::Arc;

use overlay_core::models::{GroupedValues, SourceFeature, TOTAL_GROUP_KEY};
use overlay_core::{OverlayError, Result};
use overlay_geo::PreparedSketch;
use serde::{Deserialize, Serialize};

use crate::options::EngineOptions;
use crate::processor::{add_grouped, unclipped_size, BatchRunner, DifferenceLayer, RunningTotals};
use crate::reporting::ProgressReporter;
use crate::source::FeatureSource;
use crate::workers::{BatchResult, Operation, WorkerPool};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AreaOperation {
    /// Square kilometers of overlap per group
    OverlayArea,
    /// Number of overlapping features per group
    Count,
}

impl From<AreaOperation> for Operation {
    fn from(operation: AreaOperation) -> Self {
        match operation {
            AreaOperation::OverlayArea => Operation::OverlayArea,
            AreaOperation::Count => Operation::Count,
        }
    }
}

struct AreaTotals<'a> {
    operation: AreaOperation,
    group_by: Option<&'a str>,
    values: GroupedValues<f64>,
}

impl RunningTotals for AreaTotals<'_> {
    fn add_feature(&mut self, feature: &SourceFeature) -> Result<()> {
        let group = self.group_by.and_then(|g| feature.feature.group_key(g));
        let amount = match self.operation {
            AreaOperation::OverlayArea => match feature.area_hint_sq_km() {
                Some(area) => area,
                None => unclipped_size(feature)?,
            },
            AreaOperation::Count => 1.0,
        };
        add_grouped(&mut self.values, group, amount);
        Ok(())
    }

    fn merge(&mut self, result: BatchResult) -> Result<()> {
        match result {
            BatchResult::OverlayArea(partial) => {
                for (key, amount) in partial {
                    *self.values.entry(key).or_insert(0.0) += amount;
                }
            }
            BatchResult::Count(ids) => {
                for (key, ids) in ids {
                    *self.values.entry(key).or_insert(0.0) += ids.len() as f64;
                }
            }
            other => return Err(OverlayError::MetricTypeMismatch { found: format!("{other:?}") }),
        }
        Ok(())
    }
}

/// Batch processor for `overlay_area` and plain `count`
pub struct OverlappingAreaBatchedProcessor {
    operation: AreaOperation,
    runner: BatchRunner,
}

impl OverlappingAreaBatchedProcessor {
    pub fn new(
        operation: AreaOperation,
        subject: PreparedSketch,
        intersection_source: Arc<dyn FeatureSource>,
        options: &EngineOptions,
    ) -> Self {
        Self { operation, runner: BatchRunner::new(operation.into(), subject, intersection_source, options) }
    }

    pub fn with_difference_layer(mut self, layer: DifferenceLayer) -> Self {
        self.runner.difference_layers.push(layer);
        self
    }

    pub fn with_group_by(mut self, group_by: impl Into<String>) -> Self {
        self.runner.options.group_by = Some(group_by.into());
        self
    }

    pub fn with_pool(mut self, pool: Arc<WorkerPool>) -> Self {
        self.runner.pool = Some(pool);
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.runner.reporter = reporter;
        self
    }

    /// Totals keyed by group, with the overall total under `"*"`
    pub async fn calculate(&self) -> Result<GroupedValues<f64>> {
        let mut totals = AreaTotals {
            operation: self.operation,
            group_by: self.runner.options.group_by.as_deref(),
            values: GroupedValues::from([(TOTAL_GROUP_KEY.to_string(), 0.0)]),
        };
        self.runner.run(&mut totals).await?;
        Ok(totals.values)
    }
}
