//! Batched overlay processor.
//!
//! Streams reference features over a subject's envelopes in a single pass.
//! Each feature is classified against the subject with a [`ContainerIndex`]:
//! features outside are skipped, features that need no clipping are added to
//! the running totals directly, and the rest are collected into
//! weight-bounded batches that run on a [`WorkerPool`] (or inline when no
//! pool is configured). Partial batch results are merged as they complete,
//! in any order.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use futures::future::{self, BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt, TryStreamExt};
use geo::MultiPolygon;
use overlay_core::models::{
    ColumnValueSamples, CountValue, Envelope, Feature, GroupedValues, Metric, PresenceTableValue,
    SourceFeature, TOTAL_GROUP_KEY,
};
use overlay_core::stats::calculate_column_value_stats;
use overlay_core::{OverlayError, Predicate, Result, UniqueIdIndex};
use overlay_geo::models::to_multi_polygon;
use overlay_geo::ops::union_all;
use overlay_geo::{area_sq_km, length_km, Classification, ContainerIndex, PreparedSketch};

use crate::batch::{weight_for_geometry, BatchData, DifferenceReferences};
use crate::options::EngineOptions;
use crate::reporting::{NoopReporter, ProgressReporter};
use crate::source::FeatureSource;
use crate::workers::jobs::{column_value, presence_row, push_column_sample};
use crate::workers::{run_job, BatchResult, Operation, OperationOptions, WorkerPool, WorkerRequest};

/// A source whose features are removed from the subject
#[derive(Clone)]
pub struct DifferenceLayer {
    pub layer_id: String,
    pub source: Arc<dyn FeatureSource>,
    pub predicate: Option<Predicate>,
}

impl DifferenceLayer {
    pub fn new(layer_id: impl Into<String>, source: Arc<dyn FeatureSource>) -> Self {
        Self { layer_id: layer_id.into(), source, predicate: None }
    }

    /// Only subtract features matching the predicate
    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(predicate);
        self
    }
}

impl std::fmt::Debug for DifferenceLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DifferenceLayer")
            .field("layer_id", &self.layer_id)
            .field("predicate", &self.predicate)
            .finish()
    }
}

/// Running results of one calculation
pub(crate) trait RunningTotals {
    /// Add a feature that lies inside the subject and needs no clipping
    fn add_feature(&mut self, feature: &SourceFeature) -> Result<()>;

    fn merge(&mut self, result: BatchResult) -> Result<()>;

    /// True once the outcome can no longer change
    fn is_resolved(&self) -> bool {
        false
    }
}

/// Overlap size of an unclipped feature: square kilometers for polygons,
/// kilometers for lines
pub(crate) fn unclipped_size(feature: &SourceFeature) -> Result<f64> {
    let geometry = feature.geometry();
    if geometry.is_polygonal() {
        Ok(area_sq_km(geometry))
    } else if geometry.is_linear() {
        Ok(length_km(geometry))
    } else {
        Err(OverlayError::UnsupportedGeometry { geometry_type: geometry.geometry_type().as_str().to_string() })
    }
}

pub(crate) fn add_grouped(values: &mut GroupedValues<f64>, group: Option<String>, amount: f64) {
    *values.entry(TOTAL_GROUP_KEY.to_string()).or_insert(0.0) += amount;
    if let Some(group) = group {
        *values.entry(group).or_insert(0.0) += amount;
    }
}

type PendingBatch = BoxFuture<'static, Result<BatchResult>>;

/// Streaming and batching shared by the batch processors
pub(crate) struct BatchRunner {
    pub(crate) operation: Operation,
    subject: PreparedSketch,
    subject_polygons: Arc<MultiPolygon<f64>>,
    container: ContainerIndex,
    intersection_source: Arc<dyn FeatureSource>,
    pub(crate) difference_layers: Vec<DifferenceLayer>,
    pub(crate) options: OperationOptions,
    max_batch_size: u64,
    pub(crate) pool: Option<Arc<WorkerPool>>,
    pub(crate) reporter: Arc<dyn ProgressReporter>,
}

impl BatchRunner {
    pub(crate) fn new(
        operation: Operation,
        subject: PreparedSketch,
        intersection_source: Arc<dyn FeatureSource>,
        engine: &EngineOptions,
    ) -> Self {
        let subject_polygons = Arc::new(subject.multi_polygon().clone());
        let container = ContainerIndex::new(&subject_polygons);
        Self {
            operation,
            subject,
            subject_polygons,
            container,
            intersection_source,
            difference_layers: Vec::new(),
            options: OperationOptions { results_limit: engine.results_limit, ..Default::default() },
            max_batch_size: engine.max_batch_size,
            pool: None,
            reporter: Arc::new(NoopReporter),
        }
    }

    fn envelopes(&self) -> &[Envelope] {
        &self.subject.envelopes
    }

    pub(crate) async fn run<T: RunningTotals>(&self, totals: &mut T) -> Result<()> {
        let plan = self.intersection_source.create_plan(self.envelopes()).await?;
        let concurrency = self.pool.as_ref().map_or(1, |p| p.size()).max(1) as u64;
        let batch_size = (plan.estimated_bytes / concurrency).min(self.max_batch_size);
        tracing::info!(
            operation = self.operation.as_str(),
            batch_size,
            estimated_bytes = plan.estimated_bytes,
            concurrency,
            "Starting batched calculation"
        );
        self.reporter.log(&format!(
            "Using batch size of {batch_size} for {} estimated bytes of features. Concurrency is {concurrency}, and max batch size setting is {}",
            plan.estimated_bytes, self.max_batch_size
        ));
        if self.reporter.wants_features() {
            self.reporter.log_feature("subject-feature", &self.subject.feature);
        }

        let options = Arc::new(self.options.clone());
        let target = plan.estimated_bytes;
        let mut progress = 0u64;
        let mut dispatched = 0usize;
        let mut batch = BatchData::new(weight_for_geometry(self.subject.geometry()));
        let mut pending: FuturesUnordered<PendingBatch> = FuturesUnordered::new();

        let mut features = self.intersection_source.get_features(self.envelopes());
        while let Some(feature) = features.try_next().await? {
            self.report_progress(progress, target);
            let classification = self.container.classify(feature.geometry());
            if self.reporter.wants_features() {
                self.log_classified(&feature, classification);
            }
            let requires_intersection = match classification {
                Classification::Outside => {
                    progress += 1;
                    continue;
                }
                Classification::Mixed => self.operation.clips_mixed_features(),
                Classification::Inside => false,
            };
            let requires_difference = self.search_difference_layers(&feature, &mut batch);

            if !requires_intersection && !requires_difference {
                progress += feature.byte_length.unwrap_or(0);
                totals.add_feature(&feature)?;
                if totals.is_resolved() {
                    tracing::debug!(operation = self.operation.as_str(), "Resolved before streaming finished");
                    return Ok(());
                }
            } else {
                batch.add_feature(feature, requires_intersection, requires_difference);
            }

            if !batch.is_empty() && batch.weight >= batch_size {
                progress += batch.progress_worth;
                pending.push(self.dispatch(batch.take(), &options).await?);
                dispatched += 1;
            }

            while let Some(Some(result)) = pending.next().now_or_never() {
                totals.merge(result?)?;
            }
            if totals.is_resolved() {
                return Ok(());
            }
        }

        if !batch.is_empty() {
            pending.push(self.dispatch(batch.take(), &options).await?);
            dispatched += 1;
        }
        while let Some(result) = pending.next().await {
            totals.merge(result?)?;
            if totals.is_resolved() {
                return Ok(());
            }
        }

        tracing::info!(operation = self.operation.as_str(), batches = dispatched, "Resolved batches");
        self.reporter.log(&format!("Resolved {dispatched} batches"));
        self.reporter.progress(100.0, None);
        Ok(())
    }

    fn report_progress(&self, progress: u64, target: u64) {
        let percent = if target == 0 { 0.0 } else { (progress as f64 / target as f64 * 100.0).min(100.0) };
        self.reporter
            .progress(percent, Some(&format!("Processing features: ({progress}/{target} bytes)")));
    }

    fn log_classified(&self, feature: &SourceFeature, classification: Classification) {
        let label = match classification {
            Classification::Inside => "inside",
            Classification::Outside => "outside",
            Classification::Mixed => "mixed",
        };
        let group = self
            .options
            .group_by
            .as_deref()
            .and_then(|g| feature.feature.group_key(g))
            .unwrap_or_default();
        let debug = Feature::new(feature.geometry().clone())
            .property("classification", label)
            .property("groupBy", group);
        self.reporter.log_feature("classified-features", &debug);
    }

    /// Record matching difference features in the batch. Returns whether any matched.
    fn search_difference_layers(&self, feature: &SourceFeature, batch: &mut BatchData) -> bool {
        if self.difference_layers.is_empty() {
            return false;
        }
        let Some(bbox) = feature.geometry().bbox() else {
            return false;
        };
        let envelope = Envelope::from_bbox(bbox);
        let mut matched = false;
        for layer in &self.difference_layers {
            let matches = layer.source.search(&envelope);
            if !matches.is_empty() {
                matched = true;
                batch.add_difference_refs(&layer.layer_id, &matches.refs);
            }
        }
        matched
    }

    /// Fetch and union the difference features referenced by a batch
    async fn difference_polygons(&self, refs: &BTreeMap<String, DifferenceReferences>) -> Result<MultiPolygon<f64>> {
        let per_layer = future::try_join_all(self.difference_layers.iter().map(|layer| async move {
            let mut polygons = Vec::new();
            let Some(layer_refs) = refs.get(&layer.layer_id).filter(|r| !r.is_empty()) else {
                return Ok::<_, OverlayError>(polygons);
            };
            let mut features = layer.source.get_by_refs(&layer_refs.refs);
            while let Some(feature) = features.try_next().await? {
                if let Some(predicate) = &layer.predicate {
                    if !predicate.evaluate(feature.properties()) {
                        continue;
                    }
                }
                if let Some(mp) = to_multi_polygon(feature.geometry()) {
                    polygons.push(mp);
                }
            }
            Ok(polygons)
        }))
        .await?;
        Ok(union_all(per_layer.into_iter().flatten()))
    }

    async fn dispatch(&self, batch: BatchData, options: &Arc<OperationOptions>) -> Result<PendingBatch> {
        let difference = self.difference_polygons(&batch.difference_refs).await?;
        tracing::debug!(
            operation = self.operation.as_str(),
            features = batch.features.len(),
            difference_polygons = difference.0.len(),
            weight = batch.weight,
            "Submitting batch"
        );
        let request = WorkerRequest {
            operation: self.operation,
            features: batch.features,
            difference,
            subject: Arc::clone(&self.subject_polygons),
            options: Arc::clone(options),
        };
        match &self.pool {
            Some(pool) => {
                if pool.is_saturated() {
                    self.reporter.log("Waiting for worker pool to drain");
                }
                let receiver = pool.submit(request).await?;
                Ok(async move { receiver.await.map_err(|_| OverlayError::PoolClosed)?.into_result() }.boxed())
            }
            None => Ok(future::ready(run_job(&request)).boxed()),
        }
    }
}

enum TotalsValue {
    OverlayArea(GroupedValues<f64>),
    Count(BTreeMap<String, BTreeSet<i64>>),
    Presence(bool),
    PresenceTable { table: PresenceTableValue, ids: HashSet<String> },
    ColumnValues(ColumnValueSamples),
}

/// Running totals for every [`Operation`]
struct OperationTotals<'a> {
    options: &'a OperationOptions,
    value: TotalsValue,
}

impl<'a> OperationTotals<'a> {
    fn new(operation: Operation, options: &'a OperationOptions) -> Self {
        let value = match operation {
            Operation::OverlayArea => {
                TotalsValue::OverlayArea(BTreeMap::from([(TOTAL_GROUP_KEY.to_string(), 0.0)]))
            }
            Operation::Count => TotalsValue::Count(BTreeMap::from([(TOTAL_GROUP_KEY.to_string(), BTreeSet::new())])),
            Operation::Presence => TotalsValue::Presence(false),
            Operation::PresenceTable => {
                TotalsValue::PresenceTable { table: PresenceTableValue::default(), ids: HashSet::new() }
            }
            Operation::ColumnValues => {
                TotalsValue::ColumnValues(BTreeMap::from([(TOTAL_GROUP_KEY.to_string(), BTreeMap::new())]))
            }
        };
        Self { options, value }
    }

    fn group_of(&self, feature: &Feature) -> Option<String> {
        self.options.group_by.as_deref().and_then(|g| feature.group_key(g))
    }

    fn finish(self, max_histogram_entries: usize) -> Metric {
        match self.value {
            TotalsValue::OverlayArea(values) => Metric::OverlayArea(values),
            TotalsValue::Count(ids) => Metric::Count(
                ids.into_iter()
                    .map(|(key, ids)| {
                        let index = UniqueIdIndex::from_ids(ids);
                        (key, CountValue { count: index.count(), unique_id_index: index })
                    })
                    .collect(),
            ),
            TotalsValue::Presence(present) => Metric::Presence(present),
            TotalsValue::PresenceTable { mut table, .. } => {
                table.apply_limit(self.options.results_limit);
                Metric::PresenceTable(table)
            }
            TotalsValue::ColumnValues(samples) => Metric::ColumnValues(
                samples
                    .into_iter()
                    .map(|(group, attributes)| {
                        let stats = attributes
                            .into_iter()
                            .map(|(attr, values)| (attr, calculate_column_value_stats(&values, max_histogram_entries)))
                            .collect();
                        (group, stats)
                    })
                    .collect(),
            ),
        }
    }
}

fn push_unique_row(table: &mut PresenceTableValue, ids: &mut HashSet<String>, row: overlay_core::models::Properties) {
    if ids.insert(PresenceTableValue::row_key(&row)) {
        table.values.push(row);
    }
}

impl RunningTotals for OperationTotals<'_> {
    fn add_feature(&mut self, feature: &SourceFeature) -> Result<()> {
        let group = self.group_of(&feature.feature);
        let options = self.options;
        match &mut self.value {
            TotalsValue::OverlayArea(values) => add_grouped(values, group, unclipped_size(feature)?),
            TotalsValue::Count(ids) => {
                let oidx = feature.oidx.ok_or(OverlayError::MissingFeatureId)?;
                if let Some(group) = group {
                    ids.entry(group).or_default().insert(oidx);
                }
                ids.entry(TOTAL_GROUP_KEY.to_string()).or_default().insert(oidx);
            }
            TotalsValue::Presence(present) => *present = true,
            TotalsValue::PresenceTable { table, ids } => {
                let oidx = feature.oidx.ok_or(OverlayError::MissingFeatureId)?;
                let row = presence_row(oidx, feature.properties(), options.included_properties.as_deref());
                push_unique_row(table, ids, row);
            }
            TotalsValue::ColumnValues(samples) => {
                let property = options.property.as_deref().ok_or(OverlayError::MissingColumnProperty)?;
                let geometry = feature.geometry();
                let weight = if geometry.is_puntal() {
                    None
                } else {
                    let size = unclipped_size(feature)?;
                    if !size.is_finite() || size == 0.0 {
                        return Ok(());
                    }
                    Some(size)
                };
                if let Some(value) = column_value(&feature.feature, property) {
                    push_column_sample(samples, &feature.feature, property, options.group_by.as_deref(), value, weight);
                }
            }
        }
        Ok(())
    }

    fn merge(&mut self, result: BatchResult) -> Result<()> {
        match (&mut self.value, result) {
            (TotalsValue::OverlayArea(values), BatchResult::OverlayArea(partial)) => {
                for (key, amount) in partial {
                    *values.entry(key).or_insert(0.0) += amount;
                }
            }
            (TotalsValue::Count(ids), BatchResult::Count(partial)) => {
                for (key, batch_ids) in partial {
                    ids.entry(key).or_default().extend(batch_ids);
                }
            }
            (TotalsValue::Presence(present), BatchResult::Presence(partial)) => *present |= partial,
            (TotalsValue::PresenceTable { table, ids }, BatchResult::PresenceTable(partial)) => {
                table.exceeded_limit |= partial.exceeded_limit;
                for row in partial.values {
                    push_unique_row(table, ids, row);
                }
            }
            (TotalsValue::ColumnValues(samples), BatchResult::ColumnValues(partial)) => {
                for (group, attributes) in partial {
                    let target = samples.entry(group).or_default();
                    for (attr, values) in attributes {
                        target.entry(attr).or_default().extend(values);
                    }
                }
            }
            (_, other) => {
                return Err(OverlayError::MetricTypeMismatch { found: format!("{other:?}") });
            }
        }
        Ok(())
    }

    fn is_resolved(&self) -> bool {
        matches!(self.value, TotalsValue::Presence(true))
    }
}

/// Multi-operation batch processor.
///
/// ```ignore
/// let metric = OverlayEngineBatchProcessor::new(Operation::Count, sketch, source, &options)
///     .with_group_by("habitat")
///     .with_pool(pool)
///     .calculate()
///     .await?;
/// ```
pub struct OverlayEngineBatchProcessor {
    runner: BatchRunner,
    max_histogram_entries: usize,
}

impl OverlayEngineBatchProcessor {
    pub fn new(
        operation: Operation,
        subject: PreparedSketch,
        intersection_source: Arc<dyn FeatureSource>,
        options: &EngineOptions,
    ) -> Self {
        Self {
            runner: BatchRunner::new(operation, subject, intersection_source, options),
            max_histogram_entries: options.max_histogram_entries,
        }
    }

    pub fn operation(&self) -> Operation {
        self.runner.operation
    }

    pub fn with_difference_layer(mut self, layer: DifferenceLayer) -> Self {
        self.runner.difference_layers.push(layer);
        self
    }

    pub fn with_group_by(mut self, group_by: impl Into<String>) -> Self {
        self.runner.options.group_by = Some(group_by.into());
        self
    }

    /// Properties copied into presence table rows
    pub fn with_included_properties(mut self, properties: Vec<String>) -> Self {
        self.runner.options.included_properties = Some(properties);
        self
    }

    pub fn with_results_limit(mut self, limit: usize) -> Self {
        self.runner.options.results_limit = limit;
        self
    }

    /// Column summarized by `column_values`
    pub fn with_property(mut self, property: impl Into<String>) -> Self {
        self.runner.options.property = Some(property.into());
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

    /// Run the calculation.
    ///
    /// A failed batch fails the whole calculation; no partial metric is
    /// returned. `presence` returns as soon as one contributing feature is
    /// found.
    pub async fn calculate(&self) -> Result<Metric> {
        if self.runner.operation == Operation::ColumnValues && self.runner.options.property.is_none() {
            return Err(OverlayError::MissingColumnProperty);
        }
        let mut totals = OperationTotals::new(self.runner.operation, &self.runner.options);
        self.runner.run(&mut totals).await?;
        Ok(totals.finish(self.max_histogram_entries))
    }
}
