//! The clipping seam between the geography pipeline and feature retrieval.
//!
//! [`clip_to_geography`](crate::geographies::clip_to_geography) never reads
//! features itself. It asks a [`ClippingFn`] to clip the sketch against one
//! source at a time, so retrieval and caching strategy can be swapped without
//! touching the pipeline. [`SourceClipper`] is the standard implementation
//! over a [`SourceRegistry`].

use async_trait::async_trait;
use futures::TryStreamExt;
use geo::{BooleanOps, MultiPolygon};
use overlay_core::models::ClippingOperation;
use overlay_core::{Predicate, Result};
use overlay_geo::models::to_multi_polygon;
use overlay_geo::ops::{drop_slivers, is_effectively_empty, union_all};
use overlay_geo::PreparedSketch;

use crate::source::{FeatureStream, SourceRegistry};

/// Outcome of clipping a sketch against one source
#[derive(Debug, Clone, PartialEq)]
pub struct PolygonClipResult {
    /// False when the output is the unmodified sketch
    pub changed: bool,
    pub op: ClippingOperation,
    /// `None` when nothing of the sketch is left
    pub output: Option<MultiPolygon<f64>>,
}

/// Clips a prepared sketch against the features of a single source
#[async_trait]
pub trait ClippingFn: Send + Sync {
    async fn clip(
        &self,
        sketch: &PreparedSketch,
        source: &str,
        op: ClippingOperation,
        predicate: Option<&Predicate>,
    ) -> Result<PolygonClipResult>;
}

/// Clip a sketch against every polygon in a feature stream.
///
/// Non-polygonal features and features rejected by the predicate are
/// ignored. With no matching polygons an INTERSECT removes the whole sketch
/// and a DIFFERENCE leaves it untouched.
pub async fn clip_sketch_to_polygons(
    sketch: &PreparedSketch,
    op: ClippingOperation,
    predicate: Option<&Predicate>,
    mut features: FeatureStream<'_>,
) -> Result<PolygonClipResult> {
    let mut polygons = Vec::new();
    while let Some(feature) = features.try_next().await? {
        if let Some(predicate) = predicate {
            if !predicate.evaluate(feature.properties()) {
                continue;
            }
        }
        if let Some(mp) = to_multi_polygon(feature.geometry()) {
            polygons.push(mp);
        }
    }

    if polygons.is_empty() {
        return Ok(match op {
            ClippingOperation::Intersect => PolygonClipResult { changed: true, op, output: None },
            ClippingOperation::Difference => PolygonClipResult {
                changed: false,
                op,
                output: Some(sketch.multi_polygon().clone()),
            },
        });
    }

    let clipping = union_all(polygons);
    let output = match op {
        ClippingOperation::Intersect => sketch.multi_polygon().intersection(&clipping),
        ClippingOperation::Difference => sketch.multi_polygon().difference(&clipping),
    };
    let output = drop_slivers(output);

    if is_effectively_empty(&output) {
        return Ok(PolygonClipResult { changed: true, op, output: None });
    }

    Ok(PolygonClipResult { changed: output != *sketch.multi_polygon(), op, output: Some(output) })
}

/// [`ClippingFn`] that streams features from registered sources
#[derive(Debug, Clone)]
pub struct SourceClipper {
    registry: SourceRegistry,
}

impl SourceClipper {
    pub fn new(registry: SourceRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }
}

#[async_trait]
impl ClippingFn for SourceClipper {
    async fn clip(
        &self,
        sketch: &PreparedSketch,
        source: &str,
        op: ClippingOperation,
        predicate: Option<&Predicate>,
    ) -> Result<PolygonClipResult> {
        let feature_source = self.registry.get(source)?;
        let features = feature_source.get_features(&sketch.envelopes);
        let result = clip_sketch_to_polygons(sketch, op, predicate, features).await?;
        tracing::debug!(
            source,
            op = op.as_str(),
            changed = result.changed,
            empty = result.output.is_none(),
            "Clipped sketch"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemorySource;
    use geo::Area;
    use overlay_core::models::{Feature, Geometry};
    use overlay_geo::prepare_sketch;
    use serde_json::json;
    use std::sync::Arc;

    fn sketch() -> PreparedSketch {
        prepare_sketch(&Feature::new(Geometry::rectangle(0.0, 0.0, 4.0, 4.0))).unwrap()
    }

    fn clipper() -> SourceClipper {
        let land = InMemorySource::new(vec![
            Feature::new(Geometry::rectangle(-1.0, -1.0, 2.0, 5.0)).property("kind", "land"),
            Feature::new(Geometry::rectangle(3.0, 3.0, 5.0, 5.0)).property("kind", "reef"),
        ]);
        SourceClipper::new(SourceRegistry::new().with_source("land", Arc::new(land)))
    }

    #[tokio::test]
    async fn test_intersect_with_union_of_features() {
        let result = clipper().clip(&sketch(), "land", ClippingOperation::Intersect, None).await.unwrap();
        assert!(result.changed);
        let area = result.output.unwrap().unsigned_area();
        assert!((area - 9.0).abs() < 1e-9, "area was {area}");
    }

    #[tokio::test]
    async fn test_predicate_filters_features() {
        let predicate = Predicate::parse(&json!({"op": "=", "args": [{"property": "kind"}, "reef"]})).unwrap();
        let result = clipper()
            .clip(&sketch(), "land", ClippingOperation::Difference, Some(&predicate))
            .await
            .unwrap();
        assert!(result.changed);
        assert!((result.output.unwrap().unsigned_area() - 15.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_no_matches() {
        let predicate = Predicate::parse(&json!({"op": "=", "args": [{"property": "kind"}, "ice"]})).unwrap();
        let intersect = clipper()
            .clip(&sketch(), "land", ClippingOperation::Intersect, Some(&predicate))
            .await
            .unwrap();
        assert_eq!(intersect, PolygonClipResult { changed: true, op: ClippingOperation::Intersect, output: None });

        let difference = clipper()
            .clip(&sketch(), "land", ClippingOperation::Difference, Some(&predicate))
            .await
            .unwrap();
        assert!(!difference.changed);
        assert_eq!(difference.output.as_ref(), Some(sketch().multi_polygon()));
    }

    #[tokio::test]
    async fn test_difference_covering_sketch_is_empty() {
        let cover = InMemorySource::new(vec![Feature::new(Geometry::rectangle(-10.0, -10.0, 10.0, 10.0))]);
        let clipper = SourceClipper::new(SourceRegistry::new().with_source("cover", Arc::new(cover)));
        let result = clipper.clip(&sketch(), "cover", ClippingOperation::Difference, None).await.unwrap();
        assert!(result.changed);
        assert!(result.output.is_none());
    }

    #[tokio::test]
    async fn test_unknown_source() {
        let err = clipper().clip(&sketch(), "missing", ClippingOperation::Intersect, None).await.unwrap_err();
        assert!(matches!(err, overlay_core::OverlayError::Source { .. }));
    }
}
