//! Antimeridian-safe bounding box helpers.
//!
//! A bbox is `[min_x, min_y, max_x, max_y]`. Two encodings of a box crossing
//! the antimeridian are accepted: the canonical one with `min_x > max_x`, and
//! the contiguous one where a bound lies outside [-180, 180].

use overlay_core::models::{BBox, Envelope};

/// Wrap a longitude into [-180, 180]
pub fn normalize_longitude(lng: f64) -> f64 {
    if (-180.0..=180.0).contains(&lng) {
        return lng;
    }
    let mut wrapped = lng % 360.0;
    if wrapped > 180.0 {
        wrapped -= 360.0;
    }
    if wrapped < -180.0 {
        wrapped += 360.0;
    }
    if wrapped == 0.0 {
        wrapped = 0.0;
    }
    wrapped
}

/// Wrap a latitude into [-90, 90]
pub fn normalize_latitude(lat: f64) -> f64 {
    if (-90.0..=90.0).contains(&lat) {
        return lat;
    }
    let mut wrapped = lat % 180.0;
    if wrapped > 90.0 {
        wrapped -= 180.0;
    }
    if wrapped < -90.0 {
        wrapped += 180.0;
    }
    if wrapped == 0.0 {
        wrapped = 0.0;
    }
    wrapped
}

/// Bring both x bounds into [-180, 180].
///
/// A box that crossed the antimeridian comes back in canonical form with
/// `min_x > max_x`. A box spanning the whole world becomes `[-180, 180]`.
pub fn clean_bbox(bbox: BBox) -> BBox {
    let [min_x, min_y, max_x, max_y] = bbox;
    if min_x <= max_x && max_x - min_x >= 360.0 {
        return [-180.0, min_y, 180.0, max_y];
    }
    [normalize_longitude(min_x), min_y, normalize_longitude(max_x), max_y]
}

/// Split a bbox at the antimeridian.
///
/// Crossing boxes produce two boxes, one ending at 180 and one starting at
/// -180. Non-crossing boxes are returned unchanged.
pub fn split_bbox_antimeridian(bbox: BBox) -> Vec<BBox> {
    let [min_x, min_y, max_x, max_y] = bbox;

    let crosses = min_x > max_x || min_x < -180.0 || max_x > 180.0;
    if !crosses {
        return vec![bbox];
    }
    if min_x <= max_x && max_x - min_x >= 360.0 {
        return vec![[-180.0, min_y, 180.0, max_y]];
    }

    let [west, _, east, _] = clean_bbox(bbox);
    if west <= east {
        // the whole box sat on the far side of the seam
        return vec![[west, min_y, east, max_y]];
    }

    let mut parts = Vec::with_capacity(2);
    if west < 180.0 {
        parts.push([west, min_y, 180.0, max_y]);
    }
    if east > -180.0 {
        parts.push([-180.0, min_y, east, max_y]);
    }
    if parts.is_empty() {
        parts.push([-180.0, min_y, 180.0, max_y]);
    }
    parts
}

pub fn bbox_to_envelope(bbox: BBox) -> Envelope {
    Envelope::from_bbox(bbox)
}

/// Split a bbox and convert every part to a query envelope
pub fn bbox_to_envelopes(bbox: BBox) -> Vec<Envelope> {
    split_bbox_antimeridian(bbox).into_iter().map(bbox_to_envelope).collect()
}

/// Check if two boxes overlap; touching edges count
pub fn bbox_intersects(a: &BBox, b: &BBox) -> bool {
    a[0] <= b[2] && a[2] >= b[0] && a[1] <= b[3] && a[3] >= b[1]
}

/// Check if `outer` fully contains `inner`
pub fn bbox_contains(outer: &BBox, inner: &BBox) -> bool {
    outer[0] <= inner[0] && outer[1] <= inner[1] && outer[2] >= inner[2] && outer[3] >= inner[3]
}
