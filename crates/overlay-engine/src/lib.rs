//! Overlay Engine - geography clipping, fragments and batched overlay processors
//!
//! This crate turns a sketch into geography-disjoint fragments and computes
//! overlay metrics against large reference layers. Reference features are
//! read through the [`FeatureSource`] port; CPU-heavy clipping runs on a
//! [`WorkerPool`].

pub mod area_processor;
pub mod batch;
pub mod clipping;
pub mod fragments;
pub mod geographies;
pub mod ids;
pub mod memory;
pub mod options;
pub mod processor;
pub mod reporting;
pub mod source;
pub mod workers;

pub use area_processor::{AreaOperation, OverlappingAreaBatchedProcessor};
pub use clipping::{clip_sketch_to_polygons, ClippingFn, PolygonClipResult, SourceClipper};
pub use fragments::{
    clip_to_geographies, create_fragments, eliminate_overlap, merge_touching_fragments,
    ClipToGeographiesRequest, ClipToGeographiesResult, Fragment, FragmentOptions,
};
pub use geographies::{clip_to_geography, consolidate_clipping_layers};
pub use ids::FragmentIdGenerator;
pub use memory::InMemorySource;
pub use options::EngineOptions;
pub use processor::{DifferenceLayer, OverlayEngineBatchProcessor};
pub use reporting::{NoopReporter, ProgressReporter, TracingReporter};
pub use source::{FeatureSource, FeatureStream, QueryPlan, SearchResult, SourceRegistry};
pub use workers::{Operation, WorkerPool};
