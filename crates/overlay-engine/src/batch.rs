//! Batch accumulation for the overlay processors

use std::collections::{BTreeMap, HashSet};

use overlay_core::models::{FeatureReference, Geometry, SourceFeature};

use crate::workers::BatchFeature;

/// Weight and progress credit for features without a byte length
const DEFAULT_FEATURE_WEIGHT: u64 = 1000;

/// Weight of a feature when deciding batch boundaries.
///
/// Uses the encoded size when known, otherwise a rough vertex count.
pub fn weight_for_feature(feature: &SourceFeature) -> u64 {
    feature.byte_length.unwrap_or_else(|| weight_for_geometry(feature.geometry()))
}

/// Vertex-count weight: ring vertices for polygons, one per point
pub fn weight_for_geometry(geometry: &Geometry) -> u64 {
    match geometry {
        Geometry::Polygon { coordinates } => coordinates.iter().map(|r| r.len() as u64).sum(),
        Geometry::MultiPolygon { coordinates } => {
            coordinates.iter().flatten().map(|r| r.len() as u64).sum()
        }
        Geometry::Point { .. } => 1,
        Geometry::MultiPoint { coordinates } => coordinates.len() as u64,
        _ => DEFAULT_FEATURE_WEIGHT,
    }
}

/// Difference features referenced by one batch, deduplicated by offset
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DifferenceReferences {
    offsets: HashSet<u64>,
    pub refs: Vec<FeatureReference>,
}

impl DifferenceReferences {
    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }
}

/// Features collected for the next worker batch
#[derive(Debug, Clone)]
pub struct BatchData {
    base_weight: u64,
    pub weight: u64,
    /// Bytes of progress credited when the batch is submitted
    pub progress_worth: u64,
    pub features: Vec<BatchFeature>,
    /// Difference references keyed by layer id
    pub difference_refs: BTreeMap<String, DifferenceReferences>,
}

impl BatchData {
    /// Empty batch whose weight starts at the subject's weight
    pub fn new(subject_weight: u64) -> Self {
        Self {
            base_weight: subject_weight,
            weight: subject_weight,
            progress_worth: 0,
            features: Vec::new(),
            difference_refs: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn add_feature(&mut self, feature: SourceFeature, requires_intersection: bool, requires_difference: bool) {
        self.weight += weight_for_feature(&feature);
        self.progress_worth += feature.byte_length.unwrap_or(DEFAULT_FEATURE_WEIGHT);
        self.features.push(BatchFeature { feature, requires_intersection, requires_difference });
    }

    /// Record difference features for a layer, skipping offsets already held
    pub fn add_difference_refs(&mut self, layer_id: &str, refs: &[FeatureReference]) {
        let entry = self.difference_refs.entry(layer_id.to_string()).or_default();
        for &(offset, byte_length) in refs {
            if entry.offsets.insert(offset) {
                entry.refs.push((offset, byte_length));
                self.weight += byte_length.unwrap_or(DEFAULT_FEATURE_WEIGHT);
            }
        }
    }

    /// Hand the collected batch over and start a fresh one
    pub fn take(&mut self) -> BatchData {
        std::mem::replace(self, BatchData::new(self.base_weight))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use overlay_core::models::Feature;
    use proptest::prelude::*;

    fn source_feature(geometry: Geometry, byte_length: Option<u64>) -> SourceFeature {
        let mut feature = SourceFeature::new(Feature::new(geometry));
        feature.byte_length = byte_length;
        feature
    }

    #[test]
    fn test_weight_for_feature() {
        assert_eq!(weight_for_feature(&source_feature(Geometry::point(0.0, 0.0), Some(64))), 64);
        assert_eq!(weight_for_feature(&source_feature(Geometry::point(0.0, 0.0), None)), 1);
        assert_eq!(weight_for_feature(&source_feature(Geometry::rectangle(0.0, 0.0, 1.0, 1.0), None)), 5);
        let line = Geometry::line_string(vec![[0.0, 0.0], [1.0, 1.0]]);
        assert_eq!(weight_for_feature(&source_feature(line, None)), DEFAULT_FEATURE_WEIGHT);
    }

    #[test]
    fn test_batch_weight_and_reset() {
        let mut batch = BatchData::new(10);
        batch.add_feature(source_feature(Geometry::point(0.0, 0.0), Some(40)), false, true);
        batch.add_difference_refs("reefs", &[(0, Some(100)), (100, None)]);
        batch.add_difference_refs("reefs", &[(0, Some(100))]);
        assert_eq!(batch.weight, 10 + 40 + 100 + DEFAULT_FEATURE_WEIGHT);
        assert_eq!(batch.progress_worth, 40);
        assert_eq!(batch.difference_refs["reefs"].refs.len(), 2);

        let taken = batch.take();
        assert_eq!(taken.features.len(), 1);
        assert!(batch.is_empty());
        assert_eq!(batch.weight, 10);
        assert!(batch.difference_refs.is_empty());
    }

    proptest! {
        #[test]
        fn test_batch_weight_is_base_plus_features(
            base in 0u64..10_000,
            lengths in proptest::collection::vec(1u64..5_000, 0..20),
        ) {
            let mut batch = BatchData::new(base);
            for &length in &lengths {
                batch.add_feature(source_feature(Geometry::point(0.0, 0.0), Some(length)), true, false);
            }
            prop_assert_eq!(batch.weight, base + lengths.iter().sum::<u64>());
            prop_assert_eq!(batch.is_empty(), lengths.is_empty());

            let taken = batch.take();
            prop_assert_eq!(taken.features.len(), lengths.len());
            prop_assert_eq!(batch.weight, base);
        }
    }
}
