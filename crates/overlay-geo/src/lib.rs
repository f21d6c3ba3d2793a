//! Overlay Geo - antimeridian-safe geometry utilities and the container index
//!
//! Everything here works on lon/lat degrees and delegates boolean operations
//! and geodesic measurement to the `geo` crate.

pub mod antimeridian;
pub mod bbox;
pub mod clean;
pub mod container;
pub mod measure;
pub mod models;
pub mod ops;
pub mod sketch;

pub use antimeridian::{union_at_antimeridian, union_geometry_at_antimeridian};
pub use bbox::{bbox_intersects, bbox_to_envelope, bbox_to_envelopes, clean_bbox, split_bbox_antimeridian};
pub use clean::clean_coords;
pub use container::{Classification, ContainerIndex};
pub use measure::{area_sq_km, geodesic_area_m2, length_km};
pub use models::GeometryExt;
pub use sketch::{prepare_geojson_sketch, prepare_sketch, PreparedSketch};
