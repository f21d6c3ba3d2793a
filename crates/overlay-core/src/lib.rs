//! Overlay Core - data model, predicates, statistics and configuration
//!
//! This crate holds everything the overlay engine shares that does not need a
//! geometry library: the closed geometry model, CQL2 predicate evaluation,
//! unique-id indexes and the partial-metric combiners.

pub mod config;
pub mod error;
pub mod models;
pub mod predicate;
pub mod stats;
pub mod unique_ids;

pub use error::{OverlayError, Result};
pub use predicate::Predicate;
pub use unique_ids::UniqueIdIndex;
