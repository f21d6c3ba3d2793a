//! Feature source port and registry.
//!
//! A feature source is anything that can stream reference features for a set
//! of envelopes: a local index, a cached remote file, a database table. The
//! engine only talks to it through [`FeatureSource`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use overlay_core::models::{Envelope, FeatureReference, SourceFeature};
use overlay_core::{OverlayError, Result};

/// Lazy, finite sequence of features; not restartable
pub type FeatureStream<'a> = BoxStream<'a, Result<SourceFeature>>;

/// Cost estimate for reading features over some envelopes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryPlan {
    /// Estimated bytes of feature data that will be read
    pub estimated_bytes: u64,
    pub feature_count: usize,
}

/// Result of an index-only search
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchResult {
    /// Number of matching features
    pub features: usize,
    pub refs: Vec<FeatureReference>,
}

impl SearchResult {
    pub fn is_empty(&self) -> bool {
        self.features == 0
    }
}

/// Port for reading reference features
#[async_trait]
pub trait FeatureSource: Send + Sync {
    /// Estimate the work needed to read features over the envelopes
    async fn create_plan(&self, envelopes: &[Envelope]) -> Result<QueryPlan>;

    /// Stream every feature whose bbox intersects any of the envelopes.
    ///
    /// Each feature is yielded at most once even when it matches several
    /// envelopes.
    fn get_features<'a>(&'a self, envelopes: &'a [Envelope]) -> FeatureStream<'a>;

    /// Stream features by reference, skipping unknown offsets
    fn get_by_refs<'a>(&'a self, refs: &'a [FeatureReference]) -> FeatureStream<'a>;

    /// Cheap existence check against the spatial index, without decoding features
    fn search(&self, envelope: &Envelope) -> SearchResult;
}

/// Named feature sources
#[derive(Clone, Default)]
pub struct SourceRegistry {
    sources: HashMap<String, Arc<dyn FeatureSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source under a reference, replacing any previous one
    pub fn register(&mut self, source_ref: impl Into<String>, source: Arc<dyn FeatureSource>) {
        self.sources.insert(source_ref.into(), source);
    }

    pub fn with_source(mut self, source_ref: impl Into<String>, source: Arc<dyn FeatureSource>) -> Self {
        self.register(source_ref, source);
        self
    }

    /// Look up a source by reference
    pub fn get(&self, source_ref: &str) -> Result<Arc<dyn FeatureSource>> {
        self.sources.get(source_ref).cloned().ok_or_else(|| OverlayError::Source {
            source_ref: source_ref.to_string(),
            reason: "source is not registered".to_string(),
        })
    }

    pub fn contains(&self, source_ref: &str) -> bool {
        self.sources.contains_key(source_ref)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.sources.keys().collect();
        names.sort();
        f.debug_struct("SourceRegistry").field("sources", &names).finish()
    }
}
