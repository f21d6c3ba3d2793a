//! In-memory feature source for development and testing.
//!
//! Features are held in a `Vec` and indexed by bounding box with an R-tree.
//! Missing storage metadata is filled in on construction: `oidx` is the
//! feature's position, `offset` is a running byte offset and `byte_length`
//! is the length of the feature's JSON encoding.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use overlay_core::models::{Envelope, Feature, FeatureReference, SourceFeature};
use overlay_core::Result;
use rstar::{RTree, RTreeObject, AABB};

use crate::source::{FeatureSource, FeatureStream, QueryPlan, SearchResult};

/// Position of a feature together with its bounding box
#[derive(Debug, Clone, PartialEq)]
struct IndexedFeature {
    position: usize,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for IndexedFeature {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

fn to_aabb(envelope: &Envelope) -> AABB<[f64; 2]> {
    AABB::from_corners([envelope.min_x, envelope.min_y], [envelope.max_x, envelope.max_y])
}

/// In-memory implementation of FeatureSource
#[derive(Debug)]
pub struct InMemorySource {
    features: Vec<SourceFeature>,
    tree: RTree<IndexedFeature>,
    by_offset: HashMap<u64, usize>,
}

impl InMemorySource {
    /// Create a source from plain features
    pub fn new(features: Vec<Feature>) -> Self {
        Self::from_source_features(features.into_iter().map(SourceFeature::new).collect())
    }

    /// Create a source, keeping any storage metadata already present
    pub fn from_source_features(mut features: Vec<SourceFeature>) -> Self {
        let mut next_offset = 0u64;
        for (position, feature) in features.iter_mut().enumerate() {
            if feature.byte_length.is_none() {
                let encoded = serde_json::to_vec(&feature.feature).map(|b| b.len()).unwrap_or(0);
                feature.byte_length = Some(encoded as u64);
            }
            if feature.oidx.is_none() {
                feature.oidx = Some(position as i64);
            }
            if feature.offset.is_none() {
                feature.offset = Some(next_offset);
            }
            next_offset = feature.offset.unwrap_or(next_offset) + feature.byte_length.unwrap_or(0);
        }

        let indexed: Vec<IndexedFeature> = features
            .iter()
            .enumerate()
            .filter_map(|(position, feature)| {
                let bbox = feature.geometry().bbox()?;
                Some(IndexedFeature {
                    position,
                    envelope: AABB::from_corners([bbox[0], bbox[1]], [bbox[2], bbox[3]]),
                })
            })
            .collect();

        let by_offset = features
            .iter()
            .enumerate()
            .filter_map(|(position, feature)| feature.offset.map(|offset| (offset, position)))
            .collect();

        tracing::debug!(features = features.len(), indexed = indexed.len(), "Built in-memory source");

        Self { features, tree: RTree::bulk_load(indexed), by_offset }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Positions of features intersecting any envelope, in storage order
    fn positions(&self, envelopes: &[Envelope]) -> BTreeSet<usize> {
        envelopes
            .iter()
            .flat_map(|envelope| {
                self.tree
                    .locate_in_envelope_intersecting(&to_aabb(envelope))
                    .map(|indexed| indexed.position)
            })
            .collect()
    }
}

#[async_trait]
impl FeatureSource for InMemorySource {
    async fn create_plan(&self, envelopes: &[Envelope]) -> Result<QueryPlan> {
        let positions = self.positions(envelopes);
        let estimated_bytes = positions
            .iter()
            .map(|&p| self.features[p].byte_length.unwrap_or(0))
            .sum();
        Ok(QueryPlan { estimated_bytes, feature_count: positions.len() })
    }

    fn get_features<'a>(&'a self, envelopes: &'a [Envelope]) -> FeatureStream<'a> {
        let positions = self.positions(envelopes);
        stream::iter(positions.into_iter().map(move |p| Ok(self.features[p].clone()))).boxed()
    }

    fn get_by_refs<'a>(&'a self, refs: &'a [FeatureReference]) -> FeatureStream<'a> {
        let positions: BTreeSet<usize> =
            refs.iter().filter_map(|(offset, _)| self.by_offset.get(offset).copied()).collect();
        stream::iter(positions.into_iter().map(move |p| Ok(self.features[p].clone()))).boxed()
    }

    fn search(&self, envelope: &Envelope) -> SearchResult {
        let refs: Vec<FeatureReference> = self
            .tree
            .locate_in_envelope_intersecting(&to_aabb(envelope))
            .filter_map(|indexed| {
                let feature = &self.features[indexed.position];
                feature.offset.map(|offset| (offset, feature.byte_length))
            })
            .collect();
        SearchResult { features: refs.len(), refs }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use overlay_core::models::Geometry;

    fn grid() -> InMemorySource {
        let features = (0..4)
            .map(|i| {
                let x = f64::from(i) * 10.0;
                Feature::new(Geometry::rectangle(x, 0.0, x + 5.0, 5.0)).property("cell", i)
            })
            .collect();
        InMemorySource::new(features)
    }

    #[tokio::test]
    async fn test_features_deduplicated_across_envelopes() {
        let source = grid();
        let envelopes = vec![Envelope::new(0.0, 0.0, 12.0, 1.0), Envelope::new(9.0, 0.0, 25.0, 1.0)];
        let features: Vec<SourceFeature> = source.get_features(&envelopes).try_collect().await.unwrap();
        let cells: Vec<i64> = features.iter().map(|f| f.properties()["cell"].as_i64().unwrap()).collect();
        assert_eq!(cells, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_metadata_filled_in() {
        let source = grid();
        let features: Vec<SourceFeature> =
            source.get_features(&[Envelope::world()]).try_collect().await.unwrap();
        assert_eq!(features.len(), 4);
        for (i, feature) in features.iter().enumerate() {
            assert_eq!(feature.oidx, Some(i as i64));
            assert!(feature.byte_length.unwrap() > 0);
        }
        assert_eq!(features[0].offset, Some(0));
        assert_eq!(features[1].offset, features[0].byte_length);
    }

    #[tokio::test]
    async fn test_plan_estimates_bytes() {
        let source = grid();
        let plan = source.create_plan(&[Envelope::new(0.0, 0.0, 12.0, 1.0)]).await.unwrap();
        assert_eq!(plan.feature_count, 2);
        let all = source.create_plan(&[Envelope::world()]).await.unwrap();
        assert!(all.estimated_bytes > plan.estimated_bytes);
    }

    #[tokio::test]
    async fn test_search_then_fetch_by_refs() {
        let source = grid();
        let result = source.search(&Envelope::new(21.0, 1.0, 22.0, 2.0));
        assert_eq!(result.features, 1);
        let fetched: Vec<SourceFeature> = source.get_by_refs(&result.refs).try_collect().await.unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].properties()["cell"], 2);

        assert!(source.search(&Envelope::new(100.0, 100.0, 101.0, 101.0)).is_empty());
    }
}
