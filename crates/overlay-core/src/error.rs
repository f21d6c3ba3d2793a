//! Error types for the overlay engine

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OverlayError {
    // Configuration errors
    #[error("At least one INTERSECT layer is required")]
    MissingIntersectLayer,

    #[error("Unsupported operator: {op}")]
    UnsupportedOperator { op: String },

    #[error("All metrics must have the same type. Found types: {found}")]
    MetricTypeMismatch { found: String },

    #[error("Cannot combine empty array of metrics")]
    EmptyMetricSet,

    #[error("Multiple bands are not supported for raster_stats")]
    MultipleRasterBands,

    #[error("property is required for column_values operation")]
    MissingColumnProperty,

    #[error("Missing required configuration: {key}")]
    ConfigMissing { key: String },

    #[error("Invalid configuration value for {key}: {reason}")]
    ConfigInvalid { key: String, reason: String },

    // Data errors
    #[error("{reason}")]
    InvalidPredicate { reason: String },

    #[error("Invalid geometry: {reason}")]
    InvalidGeometry { reason: String },

    #[error("Unsupported geometry type: {geometry_type}")]
    UnsupportedGeometry { geometry_type: String },

    #[error("Feature properties must contain __oidx")]
    MissingFeatureId,

    #[error("No primary geography id found.")]
    NoPrimaryGeography,

    #[error("Multiple primary geography ids found.")]
    MultiplePrimaryGeographies,

    // Runtime errors
    #[error("Source {source_ref} failed: {reason}")]
    Source { source_ref: String, reason: String },

    #[error("Worker job failed: {message}")]
    WorkerFailed { message: String },

    #[error("Worker {worker_id} crashed while processing a job")]
    WorkerCrashed { worker_id: usize },

    #[error("Worker pool is closed")]
    PoolClosed,

    // Invariant guards
    #[error(
        "Fragment decomposition did not converge after {iterations} iterations ({fragments} fragments remain)"
    )]
    NonConvergentDecomposition { iterations: usize, fragments: usize },

    #[error("Duplicate fragment id: {id}")]
    DuplicateFragmentId { id: u64 },

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl OverlayError {
    /// Shorthand for predicate shape errors
    pub fn predicate(reason: impl Into<String>) -> Self {
        OverlayError::InvalidPredicate { reason: reason.into() }
    }

    /// Shorthand for geometry errors
    pub fn geometry(reason: impl Into<String>) -> Self {
        OverlayError::InvalidGeometry { reason: reason.into() }
    }

    /// True for errors raised before any I/O because the inputs were misconfigured
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            OverlayError::MissingIntersectLayer
                | OverlayError::UnsupportedOperator { .. }
                | OverlayError::MetricTypeMismatch { .. }
                | OverlayError::EmptyMetricSet
                | OverlayError::MultipleRasterBands
                | OverlayError::MissingColumnProperty
                | OverlayError::ConfigMissing { .. }
                | OverlayError::ConfigInvalid { .. }
        )
    }
}

impl From<serde_json::Error> for OverlayError {
    fn from(err: serde_json::Error) -> Self {
        OverlayError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, OverlayError>;
