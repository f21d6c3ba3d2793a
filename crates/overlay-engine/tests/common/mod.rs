//! Fixtures shared by the engine integration tests

#![allow(dead_code)]

use std::sync::Arc;

use overlay_core::models::{ClippingLayerOption, Feature, Geometry, GeographySettings};
use overlay_engine::{InMemorySource, SourceClipper, SourceRegistry};
use overlay_geo::{prepare_sketch, PreparedSketch};
use tracing_subscriber::EnvFilter;

pub const FIJI_EEZ: u32 = 1;
pub const OFFSHORE: u32 = 2;
pub const NEARSHORE: u32 = 3;

/// Install a test subscriber once; filtered by `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// EEZ split at the antimeridian into two features
pub fn eez_source() -> InMemorySource {
    InMemorySource::new(vec![
        Feature::new(Geometry::rectangle(175.0, -22.0, 180.0, -12.0)).property("name", "Fiji"),
        Feature::new(Geometry::rectangle(-180.0, -22.0, -175.0, -12.0)).property("name", "Fiji"),
        Feature::new(Geometry::rectangle(160.0, -12.0, 170.0, -5.0)).property("name", "Tuvalu"),
    ])
}

/// Territorial sea hugging the antimeridian on both sides
pub fn territorial_sea_source() -> InMemorySource {
    InMemorySource::new(vec![
        Feature::new(Geometry::rectangle(179.5, -18.0, 180.0, -17.0)).property("name", "Fiji"),
        Feature::new(Geometry::rectangle(-180.0, -18.0, -179.5, -17.0)).property("name", "Fiji"),
    ])
}

pub fn clipper() -> SourceClipper {
    SourceClipper::new(
        SourceRegistry::new()
            .with_source("eez", Arc::new(eez_source()))
            .with_source("territorial", Arc::new(territorial_sea_source())),
    )
}

pub fn fiji_query() -> serde_json::Value {
    serde_json::json!({"op": "=", "args": [{"property": "name"}, "Fiji"]})
}

/// The EEZ, the EEZ minus its territorial sea, and the territorial sea
pub fn fiji_geographies() -> Vec<GeographySettings> {
    vec![
        GeographySettings::new(FIJI_EEZ, vec![ClippingLayerOption::intersect("eez").with_query(fiji_query())]),
        GeographySettings::new(
            OFFSHORE,
            vec![
                ClippingLayerOption::intersect("eez").with_query(fiji_query()),
                ClippingLayerOption::difference("territorial"),
            ],
        ),
        GeographySettings::new(NEARSHORE, vec![ClippingLayerOption::intersect("territorial")]),
    ]
}

/// Sketch from 179E to 179W, crossing the antimeridian
pub fn fiji_sketch() -> PreparedSketch {
    let feature = Feature::new(Geometry::polygon(vec![vec![
        [179.0, -19.0],
        [181.0, -19.0],
        [181.0, -16.0],
        [179.0, -16.0],
        [179.0, -19.0],
    ]]));
    prepare_sketch(&feature).expect("sketch should prepare")
}

/// Regular grid of square cells, tagged by column parity
pub fn habitat_grid(min_x: f64, min_y: f64, cells: usize, size: f64) -> Vec<Feature> {
    let mut features = Vec::new();
    for row in 0..cells {
        for col in 0..cells {
            let x = min_x + col as f64 * size;
            let y = min_y + row as f64 * size;
            let habitat = if col % 2 == 0 { "seagrass" } else { "reef" };
            features.push(
                Feature::new(Geometry::rectangle(x, y, x + size, y + size))
                    .property("habitat", habitat)
                    .property("depth", (row * cells + col) as f64),
            );
        }
    }
    features
}
