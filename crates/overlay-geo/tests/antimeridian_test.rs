//! Integration tests for antimeridian handling
//!
//! These tests check that:
//! - Sketches crossing the seam are split into in-range parts
//! - Query envelopes never straddle the seam
//! - Split parts can be joined back without losing area
//! - The container index works on both halves of a split sketch

use overlay_core::models::{Feature, Geometry};
use overlay_geo::{
    area_sq_km, prepare_sketch, union_at_antimeridian, Classification, ContainerIndex,
};

fn fiji_sketch() -> Feature {
    Feature::new(Geometry::polygon(vec![vec![
        [179.0, -19.0],
        [181.0, -19.0],
        [181.0, -16.0],
        [179.0, -16.0],
        [179.0, -19.0],
    ]]))
}

#[test]
fn test_prepared_sketch_preserves_area() {
    let original = area_sq_km(&fiji_sketch().geometry);
    let prepared = prepare_sketch(&fiji_sketch()).unwrap();
    let split = area_sq_km(prepared.geometry());
    assert!((original - split).abs() / original < 1e-6, "{original} vs {split}");
}

#[test]
fn test_envelopes_stay_inside_world() {
    let prepared = prepare_sketch(&fiji_sketch()).unwrap();
    assert_eq!(prepared.envelopes.len(), 2);
    for envelope in &prepared.envelopes {
        assert!(envelope.min_x >= -180.0 && envelope.max_x <= 180.0);
        assert!(envelope.min_x < envelope.max_x);
    }
}

#[test]
fn test_split_sketch_rejoins() {
    let prepared = prepare_sketch(&fiji_sketch()).unwrap();
    let joined = union_at_antimeridian(prepared.multi_polygon());
    assert_eq!(joined.0.len(), 1);
    let max_x = joined.0[0].exterior().coords().map(|c| c.x).fold(f64::MIN, f64::max);
    assert!((max_x - 181.0).abs() < 1e-9);
}

#[test]
fn test_container_index_on_both_halves() {
    let prepared = prepare_sketch(&fiji_sketch()).unwrap();
    let index = ContainerIndex::new(prepared.multi_polygon());

    let east = Geometry::rectangle(179.2, -18.0, 179.5, -17.0);
    let west = Geometry::rectangle(-179.8, -18.0, -179.5, -17.0);
    let straddling = Geometry::rectangle(178.5, -18.0, 179.5, -17.0);
    let far = Geometry::rectangle(170.0, -18.0, 171.0, -17.0);

    assert_eq!(index.classify(&east), Classification::Inside);
    assert_eq!(index.classify(&west), Classification::Inside);
    assert_eq!(index.classify(&straddling), Classification::Mixed);
    assert_eq!(index.classify(&far), Classification::Outside);
}
