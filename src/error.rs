//! Unified error handling for the track-enricher library.
//!
//! Every fallible operation returns [`EnrichError`]. Callers of the enrichment
//! pipeline care about one distinction above all others: whether a failure
//! poisons the whole batch (kinematics) or only a single point (coordinate and
//! region work). The variants below are grouped accordingly.

use thiserror::Error;

/// Unified error type for track-enricher operations.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EnrichError {
    // ------------------------------------------------------------------
    // Coordinate errors
    // ------------------------------------------------------------------
    /// A coordinate system tag outside WGS84/GCJ02/BD09
    #[error("Invalid coordinate system '{name}', expected one of wgs84, gcj02, bd09")]
    InvalidCoordinateSystem { name: String },

    /// A point with non-finite or out-of-range coordinates
    #[error("Point {index} has invalid coordinates: {message}")]
    InvalidCoordinates { index: u32, message: String },

    // ------------------------------------------------------------------
    // Region errors
    // ------------------------------------------------------------------
    /// No boundary polygon contains the point (soft condition)
    #[error("Point ({lng}, {lat}) is not inside any known region")]
    RegionNotFound { lng: f64, lat: f64 },

    /// A boundary polygon matched but its code has no index entry
    #[error("Region code '{code}' matched a boundary but is missing from the code index")]
    RegionCodeIndexCorrupt { code: String },

    /// A boundary file could not be read or interpreted
    #[error("Failed to load boundary layer '{path}': {message}")]
    BoundaryLoad { path: String, message: String },

    // ------------------------------------------------------------------
    // Kinematics errors (fatal to the batch)
    // ------------------------------------------------------------------
    /// timestamp[i] < timestamp[i-1]
    #[error("Timestamp of point {index} ({current}) is earlier than point {previous_index} ({previous})")]
    NonMonotonicTimestamp {
        index: u32,
        previous_index: u32,
        previous: String,
        current: String,
    },

    /// A point without a timestamp reached the kinematics pass
    #[error("Point {index} has no timestamp")]
    MissingTimestamp { index: u32 },

    // ------------------------------------------------------------------
    // Resource errors
    // ------------------------------------------------------------------
    /// No pooled connection became available in time
    #[error("Connection pool exhausted ({max_connections} in use), waited {waited_ms}ms")]
    PoolExhausted { max_connections: usize, waited_ms: u64 },

    /// SQLite/storage error
    #[error("Persistence error: {message}")]
    Persistence { message: String },

    /// Worker pool could not be built
    #[error("Worker pool error: {message}")]
    WorkerPool { message: String },

    /// Caller abandoned a parallel operation
    #[error("Operation cancelled after {completed} of {total} items")]
    Cancelled { completed: u32, total: u32 },

    // ------------------------------------------------------------------
    // Input/output errors
    // ------------------------------------------------------------------
    /// GPX parse/write error or missing track/segment
    #[error("GPX error: {message}")]
    Gpx { message: String },

    /// Configuration error
    #[error("Configuration error for '{key}': {message}")]
    Config { key: String, message: String },

    /// File system error
    #[error("IO error: {message}")]
    Io { message: String },

    /// JSON/TOML (de)serialization error
    #[error("Serialization error: {message}")]
    Serialization { message: String },
}

impl EnrichError {
    /// Whether re-running the same operation later may succeed.
    ///
    /// Used by per-point sub-tasks: a failed point with a retriable error can
    /// be re-dispatched on its own without re-running the whole batch.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            EnrichError::PoolExhausted { .. }
                | EnrichError::Persistence { .. }
                | EnrichError::Io { .. }
        )
    }

    /// Whether this error aborts an entire enrichment batch.
    pub fn is_batch_fatal(&self) -> bool {
        matches!(
            self,
            EnrichError::NonMonotonicTimestamp { .. }
                | EnrichError::MissingTimestamp { .. }
                | EnrichError::InvalidCoordinates { .. }
                | EnrichError::Cancelled { .. }
        )
    }
}

impl From<rusqlite::Error> for EnrichError {
    fn from(e: rusqlite::Error) -> Self {
        EnrichError::Persistence {
            message: e.to_string(),
        }
    }
}

impl From<std::io::Error> for EnrichError {
    fn from(e: std::io::Error) -> Self {
        EnrichError::Io {
            message: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for EnrichError {
    fn from(e: serde_json::Error) -> Self {
        EnrichError::Serialization {
            message: e.to_string(),
        }
    }
}

impl From<gpx::errors::GpxError> for EnrichError {
    fn from(e: gpx::errors::GpxError) -> Self {
        EnrichError::Gpx {
            message: e.to_string(),
        }
    }
}

/// Result type alias for track-enricher operations.
pub type Result<T> = std::result::Result<T, EnrichError>;

/// Extension trait for converting Option to EnrichError.
pub trait OptionExt<T> {
    /// Convert Option to Result with a region-not-found error.
    fn ok_or_region_not_found(self, lng: f64, lat: f64) -> Result<T>;

    /// Convert Option to Result with a GPX error.
    fn ok_or_gpx(self, message: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_region_not_found(self, lng: f64, lat: f64) -> Result<T> {
        self.ok_or(EnrichError::RegionNotFound { lng, lat })
    }

    fn ok_or_gpx(self, message: &str) -> Result<T> {
        self.ok_or_else(|| EnrichError::Gpx {
            message: message.to_string(),
        })
    }
}
