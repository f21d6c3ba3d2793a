//! Geography clipping pipeline.
//!
//! A geography is a set of INTERSECT and DIFFERENCE layers. Clipping a sketch
//! to it resolves every INTERSECT layer first and then subtracts DIFFERENCE
//! layers one at a time from the already reduced result.

use futures::future::join_all;
use geo::{BooleanOps, MultiPolygon};
use overlay_core::models::{ClippingLayerOption, ClippingOperation};
use overlay_core::predicate::consolidate_queries;
use overlay_core::{OverlayError, Predicate, Result};
use overlay_geo::ops::{drop_slivers, is_effectively_empty};
use overlay_geo::PreparedSketch;

use crate::clipping::ClippingFn;

/// Merge layers that share a source and operation, OR-ing their queries
pub fn consolidate_clipping_layers(layers: &[ClippingLayerOption]) -> Vec<ClippingLayerOption> {
    let mut consolidated: Vec<ClippingLayerOption> = Vec::with_capacity(layers.len());
    for layer in layers {
        match consolidated.iter_mut().find(|l| l.source == layer.source && l.op == layer.op) {
            Some(existing) => {
                existing.cql2_query =
                    consolidate_queries(existing.cql2_query.take(), layer.cql2_query.clone());
                existing.weight_hint = existing.weight_hint.max(layer.weight_hint);
            }
            None => consolidated.push(layer.clone()),
        }
    }
    consolidated
}

fn parse_predicates(layers: &[ClippingLayerOption]) -> Result<Vec<Option<Predicate>>> {
    layers.iter().map(|l| Predicate::parse_optional(l.cql2_query.as_ref())).collect()
}

/// Clip a sketch to a geography.
///
/// Returns `None` when nothing of the sketch lies in the geography. Fails with
/// [`OverlayError::MissingIntersectLayer`] before any clipping when the
/// layers contain no INTERSECT operation. Every INTERSECT layer must overlap
/// the sketch; their outputs are intersected with each other.
pub async fn clip_to_geography(
    sketch: &PreparedSketch,
    layers: &[ClippingLayerOption],
    clipping: &dyn ClippingFn,
) -> Result<Option<MultiPolygon<f64>>> {
    let (intersect, difference): (Vec<ClippingLayerOption>, Vec<ClippingLayerOption>) =
        consolidate_clipping_layers(layers)
            .into_iter()
            .partition(|l| l.op == ClippingOperation::Intersect);
    if intersect.is_empty() {
        return Err(OverlayError::MissingIntersectLayer);
    }
    let intersect_predicates = parse_predicates(&intersect)?;
    let difference_predicates = parse_predicates(&difference)?;

    let results = join_all(intersect.iter().zip(&intersect_predicates).map(|(layer, predicate)| {
        clipping.clip(sketch, &layer.source, ClippingOperation::Intersect, predicate.as_ref())
    }))
    .await;

    let mut intersection: Option<MultiPolygon<f64>> = None;
    for result in results {
        let result = result?;
        let Some(output) = result.output else {
            return Ok(None);
        };
        if !result.changed {
            continue;
        }
        intersection = Some(match intersection {
            Some(current) => drop_slivers(current.intersection(&output)),
            None => output,
        });
    }

    // `None` while the sketch is still untouched
    let mut reduced: Option<PreparedSketch> = match intersection {
        Some(mp) if is_effectively_empty(&mp) => return Ok(None),
        Some(mp) => Some(PreparedSketch::from_multi_polygon(mp, sketch.feature.properties.clone())),
        None => None,
    };

    for (layer, predicate) in difference.iter().zip(&difference_predicates) {
        let target = reduced.as_ref().unwrap_or(sketch);
        let result = clipping
            .clip(target, &layer.source, ClippingOperation::Difference, predicate.as_ref())
            .await?;
        match result.output {
            None => return Ok(None),
            Some(output) if result.changed => {
                if is_effectively_empty(&output) {
                    return Ok(None);
                }
                reduced = Some(PreparedSketch::from_multi_polygon(output, sketch.feature.properties.clone()));
            }
            Some(_) => {}
        }
    }

    let output = match reduced {
        Some(prepared) => prepared.multi_polygon().clone(),
        None => sketch.multi_polygon().clone(),
    };
    Ok((!is_effectively_empty(&output)).then_some(output))
}
