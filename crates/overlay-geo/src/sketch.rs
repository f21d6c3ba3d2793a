//! Sketch preparation: normalize a user polygon into a clean, antimeridian-split
//! MultiPolygon and compute the envelopes used to query reference layers.

use geo::{coord, BooleanOps, LineString, MultiPolygon, Polygon, Rect, Translate};

use crate::bbox::bbox_to_envelopes;
use crate::clean::clean_coords;
use crate::models::{multi_polygon_to_geometry, polygon_bbox, to_multi_polygon};
use overlay_core::models::{Envelope, Feature, Geometry, Properties};
use overlay_core::{OverlayError, Result};

/// A sketch ready for clipping
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedSketch {
    /// The sketch with a `MultiPolygon` geometry
    pub feature: Feature,
    /// Query envelopes, none of which crosses the antimeridian
    pub envelopes: Vec<Envelope>,
    polygons: MultiPolygon<f64>,
}

impl PreparedSketch {
    /// Wrap an already prepared multipolygon, recomputing envelopes
    pub fn from_multi_polygon(polygons: MultiPolygon<f64>, properties: Properties) -> Self {
        let geometry = clean_coords(&multi_polygon_to_geometry(&polygons));
        let polygons = to_multi_polygon(&geometry).unwrap_or(polygons);
        let envelopes = envelopes_for(&polygons);
        Self {
            feature: Feature::with_properties(geometry, properties),
            envelopes,
            polygons,
        }
    }

    /// The sketch geometry as a geo multipolygon
    pub fn multi_polygon(&self) -> &MultiPolygon<f64> {
        &self.polygons
    }

    pub fn geometry(&self) -> &Geometry {
        &self.feature.geometry
    }

    pub fn is_empty(&self) -> bool {
        self.polygons.0.is_empty()
    }
}

/// Shift ring longitudes so consecutive vertices are never more than 180 apart
fn unwrap_ring(ring: &mut LineString<f64>) {
    let mut offset = 0.0;
    let mut previous: Option<f64> = None;
    for c in ring.0.iter_mut() {
        let raw = c.x;
        if let Some(prev) = previous {
            let dx = raw - prev;
            if dx > 180.0 {
                offset -= 360.0;
            } else if dx < -180.0 {
                offset += 360.0;
            }
        }
        previous = Some(raw);
        c.x = raw + offset;
    }
}

fn unwrap_polygon(polygon: &Polygon<f64>) -> Polygon<f64> {
    let mut exterior = polygon.exterior().clone();
    unwrap_ring(&mut exterior);
    let anchor = exterior.0.first().map_or(0.0, |c| c.x);

    let interiors = polygon
        .interiors()
        .iter()
        .map(|interior| {
            let mut ring = interior.clone();
            unwrap_ring(&mut ring);
            // keep holes in the same longitude band as their exterior
            if let Some(first) = ring.0.first() {
                let shift = ((anchor - first.x) / 360.0).round() * 360.0;
                if shift != 0.0 {
                    ring.translate_mut(shift, 0.0);
                }
            }
            ring
        })
        .collect();
    Polygon::new(exterior, interiors)
}

fn exceeds_world(mp: &MultiPolygon<f64>) -> bool {
    mp.iter()
        .flat_map(|p| std::iter::once(p.exterior()).chain(p.interiors()))
        .flat_map(|r| r.coords())
        .any(|c| c.x < -180.0 || c.x > 180.0)
}

/// Cut a contiguous multipolygon into world-sized windows and shift each
/// piece back into [-180, 180]
fn split_at_antimeridian(mp: &MultiPolygon<f64>) -> MultiPolygon<f64> {
    let mut pieces = Vec::new();
    for k in -1i32..=1 {
        let shift = 360.0 * f64::from(k);
        let window = Rect::new(
            coord! { x: -180.0 + shift, y: -90.0 },
            coord! { x: 180.0 + shift, y: 90.0 },
        )
        .to_polygon();
        let mut piece = mp.intersection(&MultiPolygon::new(vec![window]));
        if piece.0.is_empty() {
            continue;
        }
        if shift != 0.0 {
            piece.translate_mut(-shift, 0.0);
        }
        pieces.extend(piece.0);
    }
    MultiPolygon::new(pieces)
}

/// Envelopes for every part, without envelopes already covered by another
fn envelopes_for(mp: &MultiPolygon<f64>) -> Vec<Envelope> {
    let mut envelopes: Vec<Envelope> = Vec::new();
    for polygon in mp {
        let Some(bbox) = polygon_bbox(polygon) else {
            continue;
        };
        for envelope in bbox_to_envelopes(bbox) {
            if envelopes.iter().any(|e| e.contains(&envelope)) {
                continue;
            }
            envelopes.retain(|e| !envelope.contains(e));
            envelopes.push(envelope);
        }
    }
    envelopes
}

/// Prepare a polygonal sketch feature for clipping.
///
/// The geometry becomes a `MultiPolygon`. Rings are unwrapped so they stay
/// contiguous, and when any longitude then lies outside [-180, 180] the
/// sketch is split at the antimeridian so every coordinate is back in range.
/// A sketch that never leaves the normal range keeps its coordinates.
pub fn prepare_sketch(feature: &Feature) -> Result<PreparedSketch> {
    let polygons = to_multi_polygon(&feature.geometry)
        .ok_or_else(|| OverlayError::geometry("feature geometry is not a polygon or multipolygon"))?;

    let unwrapped = MultiPolygon::new(polygons.iter().map(unwrap_polygon).collect());
    let polygons = if exceeds_world(&unwrapped) {
        let split = split_at_antimeridian(&unwrapped);
        tracing::debug!(parts = split.0.len(), "Split sketch at the antimeridian");
        split
    } else {
        unwrapped
    };

    Ok(PreparedSketch::from_multi_polygon(polygons, feature.properties.clone()))
}

/// Prepare a sketch read from a GeoJSON feature
pub fn prepare_geojson_sketch(feature: &geojson::Feature) -> Result<PreparedSketch> {
    let geometry = feature
        .geometry
        .as_ref()
        .ok_or_else(|| OverlayError::geometry("feature has no geometry"))?;
    let value = serde_json::to_value(geometry)?;
    let geometry = Geometry::from_geojson(&value)
        .ok_or_else(|| OverlayError::geometry("feature geometry is not a polygon or multipolygon"))?;
    let properties = feature.properties.clone().unwrap_or_default();
    prepare_sketch(&Feature::with_properties(geometry, properties))
}
