//! Integration tests for the batch processors
//!
//! These tests verify that:
//! - Every operation agrees with a direct calculation over a regular grid
//! - Results are the same with and without a worker pool
//! - Presence stops reading features once it is known
//! - Difference layers and their predicates remove overlap
//! - A crashed worker fails the calculation

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::*;
use futures::StreamExt;
use overlay_core::models::{
    ColumnValueStats, Envelope, Feature, FeatureReference, Geometry, Metric, TOTAL_GROUP_KEY,
};
use overlay_core::{OverlayError, Predicate, Result};
use overlay_engine::workers::{BatchResult, WorkerRequest};
use overlay_engine::{
    AreaOperation, DifferenceLayer, EngineOptions, FeatureSource, FeatureStream, InMemorySource, Operation,
    OverlappingAreaBatchedProcessor, OverlayEngineBatchProcessor, ProgressReporter, QueryPlan, SearchResult,
    WorkerPool,
};
use overlay_geo::{area_sq_km, prepare_sketch, PreparedSketch};

/// Counts features handed out by the wrapped source
struct CountingSource {
    inner: InMemorySource,
    pulled: Arc<AtomicUsize>,
}

#[async_trait]
impl FeatureSource for CountingSource {
    async fn create_plan(&self, envelopes: &[Envelope]) -> Result<QueryPlan> {
        self.inner.create_plan(envelopes).await
    }

    fn get_features<'a>(&'a self, envelopes: &'a [Envelope]) -> FeatureStream<'a> {
        let pulled = Arc::clone(&self.pulled);
        self.inner
            .get_features(envelopes)
            .inspect(move |_| {
                pulled.fetch_add(1, Ordering::SeqCst);
            })
            .boxed()
    }

    fn get_by_refs<'a>(&'a self, refs: &'a [FeatureReference]) -> FeatureStream<'a> {
        self.inner.get_by_refs(refs)
    }

    fn search(&self, envelope: &Envelope) -> SearchResult {
        self.inner.search(envelope)
    }
}

#[derive(Default)]
struct RecordingReporter {
    messages: Mutex<Vec<String>>,
}

impl ProgressReporter for RecordingReporter {
    fn log(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}

fn grid() -> Arc<dyn FeatureSource> {
    Arc::new(InMemorySource::new(habitat_grid(0.0, 0.0, 4, 0.5)))
}

fn subject_geometry() -> Geometry {
    Geometry::rectangle(0.25, 0.25, 1.75, 1.75)
}

/// Covers the 4 central cells and cuts through the 12 around them
fn subject() -> PreparedSketch {
    prepare_sketch(&Feature::new(subject_geometry())).unwrap()
}

/// Two reserves: the west half is active, the east strip proposed
fn reserves() -> Arc<dyn FeatureSource> {
    Arc::new(InMemorySource::new(vec![
        Feature::new(Geometry::rectangle(0.0, 0.0, 1.0, 2.0)).property("status", "active"),
        Feature::new(Geometry::rectangle(1.5, 0.0, 2.0, 2.0)).property("status", "proposed"),
    ]))
}

fn active_only() -> Predicate {
    Predicate::parse(&serde_json::json!({"op": "=", "args": [{"property": "status"}, "active"]})).unwrap()
}

fn small_batches() -> EngineOptions {
    EngineOptions { max_batch_size: 1, ..Default::default() }
}

fn assert_close(actual: f64, expected: f64) {
    assert!((actual - expected).abs() / expected < 1e-4, "{actual} vs {expected}");
}

async fn overlay_area(processor: OverlayEngineBatchProcessor) -> std::collections::BTreeMap<String, f64> {
    match processor.calculate().await.unwrap() {
        Metric::OverlayArea(values) => values,
        other => panic!("expected overlay_area, got {}", other.type_name()),
    }
}

async fn count(processor: OverlayEngineBatchProcessor) -> u64 {
    match processor.calculate().await.unwrap() {
        Metric::Count(counts) => counts[TOTAL_GROUP_KEY].count,
        other => panic!("expected count, got {}", other.type_name()),
    }
}

#[tokio::test]
async fn test_overlay_area_matches_subject_area() {
    init_tracing();
    let processor = OverlayEngineBatchProcessor::new(Operation::OverlayArea, subject(), grid(), &EngineOptions::default())
        .with_group_by("habitat");
    let values = overlay_area(processor).await;

    let expected = area_sq_km(&subject_geometry());
    assert_close(values[TOTAL_GROUP_KEY], expected);
    assert_close(values["seagrass"] + values["reef"], values[TOTAL_GROUP_KEY]);
    // both habitats cover exactly half of the subject
    assert_close(values["seagrass"], values["reef"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pool_and_inline_results_agree() {
    init_tracing();
    let pool = Arc::new(WorkerPool::new(2, 2).unwrap());

    let pooled = overlay_area(
        OverlayEngineBatchProcessor::new(Operation::OverlayArea, subject(), grid(), &small_batches())
            .with_group_by("habitat")
            .with_pool(Arc::clone(&pool)),
    )
    .await;
    let inline = overlay_area(
        OverlayEngineBatchProcessor::new(Operation::OverlayArea, subject(), grid(), &EngineOptions::default())
            .with_group_by("habitat"),
    )
    .await;

    assert_eq!(pooled.keys().collect::<Vec<_>>(), inline.keys().collect::<Vec<_>>());
    for (key, value) in &inline {
        assert_close(pooled[key], *value);
    }
    assert_eq!(pool.replaced_workers(), 0);
}

#[tokio::test]
async fn test_count_includes_every_overlapping_cell() {
    let total = count(OverlayEngineBatchProcessor::new(Operation::Count, subject(), grid(), &EngineOptions::default())).await;
    assert_eq!(total, 16);

    let far_away = prepare_sketch(&Feature::new(Geometry::rectangle(40.0, 40.0, 41.0, 41.0))).unwrap();
    let total = count(OverlayEngineBatchProcessor::new(Operation::Count, far_away, grid(), &EngineOptions::default())).await;
    assert_eq!(total, 0);
}

#[tokio::test]
async fn test_presence_stops_after_first_feature() {
    let pulled = Arc::new(AtomicUsize::new(0));
    let source = CountingSource { inner: InMemorySource::new(habitat_grid(0.0, 0.0, 4, 0.5)), pulled: Arc::clone(&pulled) };

    let metric = OverlayEngineBatchProcessor::new(Operation::Presence, subject(), Arc::new(source), &EngineOptions::default())
        .calculate()
        .await
        .unwrap();
    assert_eq!(metric, Metric::Presence(true));
    assert_eq!(pulled.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_presence_false_when_nothing_overlaps() {
    let far_away = prepare_sketch(&Feature::new(Geometry::rectangle(40.0, 40.0, 41.0, 41.0))).unwrap();
    let metric = OverlayEngineBatchProcessor::new(Operation::Presence, far_away, grid(), &EngineOptions::default())
        .calculate()
        .await
        .unwrap();
    assert_eq!(metric, Metric::Presence(false));
}

#[tokio::test]
async fn test_difference_layer_removes_overlap() {
    let values = overlay_area(
        OverlayEngineBatchProcessor::new(Operation::OverlayArea, subject(), grid(), &EngineOptions::default())
            .with_difference_layer(DifferenceLayer::new("reserves", reserves()).with_predicate(active_only())),
    )
    .await;
    assert_close(values[TOTAL_GROUP_KEY], area_sq_km(&Geometry::rectangle(1.0, 0.25, 1.75, 1.75)));
}

#[tokio::test]
async fn test_difference_excludes_touching_features_from_count() {
    // cells touching the active reserve go, the proposed one is filtered out
    let total = count(
        OverlayEngineBatchProcessor::new(Operation::Count, subject(), grid(), &EngineOptions::default())
            .with_difference_layer(DifferenceLayer::new("reserves", reserves()).with_predicate(active_only())),
    )
    .await;
    assert_eq!(total, 4);

    let total = count(
        OverlayEngineBatchProcessor::new(Operation::Count, subject(), grid(), &EngineOptions::default())
            .with_difference_layer(DifferenceLayer::new("reserves", reserves())),
    )
    .await;
    assert_eq!(total, 0);
}

#[tokio::test]
async fn test_column_values_weighted_by_overlap() {
    let metric = OverlayEngineBatchProcessor::new(Operation::ColumnValues, subject(), grid(), &EngineOptions::default())
        .with_property("depth")
        .calculate()
        .await
        .unwrap();
    let Metric::ColumnValues(groups) = metric else { panic!("expected column values") };
    let ColumnValueStats::Number(depth) = &groups[TOTAL_GROUP_KEY]["depth"] else { panic!("expected numbers") };

    assert_eq!(depth.count, 16);
    assert_eq!(depth.min, 0.0);
    assert_eq!(depth.max, 15.0);
    assert_eq!(depth.sum, (0..16).sum::<i32>() as f64);
    assert_close(depth.total_area_sq_km.unwrap(), area_sq_km(&subject_geometry()));
}

#[tokio::test]
async fn test_column_values_requires_property() {
    let err = OverlayEngineBatchProcessor::new(Operation::ColumnValues, subject(), grid(), &EngineOptions::default())
        .calculate()
        .await
        .unwrap_err();
    assert!(matches!(err, OverlayError::MissingColumnProperty));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_presence_table_respects_limit() {
    let pool = Arc::new(WorkerPool::new(2, 2).unwrap());
    let metric = OverlayEngineBatchProcessor::new(Operation::PresenceTable, subject(), grid(), &small_batches())
        .with_results_limit(5)
        .with_included_properties(vec!["habitat".into()])
        .with_pool(pool)
        .calculate()
        .await
        .unwrap();
    let Metric::PresenceTable(table) = metric else { panic!("expected presence table") };

    assert!(table.exceeded_limit);
    assert_eq!(table.values.len(), 5);
    let mut ids: Vec<String> = table.values.iter().map(|row| row["__id"].to_string()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 5);
    assert!(table.values.iter().all(|row| row.contains_key("habitat") && !row.contains_key("depth")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_worker_crash_fails_calculation() {
    let executor = Arc::new(|_: &WorkerRequest| -> Result<BatchResult> { panic!("worker ran out of memory") });
    let pool = Arc::new(WorkerPool::with_executor(1, 1, executor).unwrap());

    let err = OverlayEngineBatchProcessor::new(Operation::OverlayArea, subject(), grid(), &small_batches())
        .with_pool(Arc::clone(&pool))
        .calculate()
        .await
        .unwrap_err();
    assert!(matches!(err, OverlayError::WorkerCrashed { .. }), "unexpected error: {err}");
}

#[tokio::test]
async fn test_fragment_areas_sum_to_whole() {
    let whole = overlay_area(OverlayEngineBatchProcessor::new(
        Operation::OverlayArea,
        subject(),
        grid(),
        &EngineOptions::default(),
    ))
    .await;

    let mut sum = 0.0;
    for half in [Geometry::rectangle(0.25, 0.25, 1.0, 1.75), Geometry::rectangle(1.0, 0.25, 1.75, 1.75)] {
        let fragment = prepare_sketch(&Feature::new(half)).unwrap();
        let values = overlay_area(OverlayEngineBatchProcessor::new(
            Operation::OverlayArea,
            fragment,
            grid(),
            &EngineOptions::default(),
        ))
        .await;
        sum += values[TOTAL_GROUP_KEY];
    }
    assert_close(sum, whole[TOTAL_GROUP_KEY]);
}

#[tokio::test]
async fn test_batch_size_is_reported() {
    let reporter = Arc::new(RecordingReporter::default());
    OverlayEngineBatchProcessor::new(Operation::Count, subject(), grid(), &EngineOptions::default())
        .with_reporter(reporter.clone())
        .calculate()
        .await
        .unwrap();

    let messages = reporter.messages.lock().unwrap();
    assert!(messages.iter().any(|m| m.starts_with("Using batch size of")));
    assert!(messages.iter().any(|m| m.starts_with("Resolved")));
}

#[tokio::test]
async fn test_area_processor_with_difference() {
    let totals = OverlappingAreaBatchedProcessor::new(AreaOperation::OverlayArea, subject(), grid(), &EngineOptions::default())
        .with_group_by("habitat")
        .with_difference_layer(DifferenceLayer::new("reserves", reserves()).with_predicate(active_only()))
        .calculate()
        .await
        .unwrap();

    let expected = area_sq_km(&Geometry::rectangle(1.0, 0.25, 1.75, 1.75));
    assert_close(totals[TOTAL_GROUP_KEY], expected);
    // column 2 is seagrass, column 3 is reef
    assert_close(totals["seagrass"], area_sq_km(&Geometry::rectangle(1.0, 0.25, 1.5, 1.75)));
    assert_close(totals["reef"], area_sq_km(&Geometry::rectangle(1.5, 0.25, 1.75, 1.75)));
}
