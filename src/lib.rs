//! # Track Enricher
//!
//! GPS track enrichment for Chinese map providers.
//!
//! This library provides:
//! - Coordinate conversion between WGS84, GCJ02 and BD09
//! - Province/city/district resolution against administrative boundaries
//! - Cumulative distance, speed, bearing and elapsed time per point
//! - Bounded parallel enrichment with per-point status tracking
//! - GPX import/export and JSON (de)serialization of enriched routes
//!
//! ## Features
//!
//! - **`cli`** - Build the `enrich-track` command-line runner
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use chrono::{TimeZone, Utc};
//! use track_enricher::{EnrichOptions, ParallelExecutor, RawPoint, TrackEnricher};
//! use track_enricher::config::CoordinateConfig;
//!
//! let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
//! let raw = vec![
//!     RawPoint::new(116.3975, 39.9087).with_time(t0),
//!     RawPoint::new(116.3985, 39.9087).with_time(t0 + chrono::Duration::seconds(10)),
//! ];
//!
//! let executor = Arc::new(ParallelExecutor::new(2).unwrap());
//! let enricher = TrackEnricher::new(executor, None, CoordinateConfig::default());
//! let options = EnrichOptions { resolve_regions: false, ..EnrichOptions::default() };
//!
//! let track = enricher.enrich(&raw, &options).unwrap();
//! assert!(track.points[1].distance > 80.0);
//! assert!(track.points[1].longitude_transformed.is_some());
//! assert!(track.task.is_complete());
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{EnrichError, OptionExt, Result};

// WGS84 / GCJ02 / BD09 conversion
pub mod coords;
pub use coords::{convert, convert_named, CoordinateSystem};

// Geographic utilities (distance, bearing)
pub mod geo_utils;

// Bounded SQLite connection pool
pub mod pool;
pub use pool::{ConnectionPool, PoolStats, PooledConnection};

// Administrative region resolution
pub mod region;
pub use region::{
    BoundaryLayer, BoundaryLayers, BoundaryPolygon, CacheStats, RegionCodeIndex, RegionNames,
    RegionResolver, SpatialIndexKind,
};

// Bounded parallel map
pub mod executor;
pub use executor::{CancelToken, CollectOrder, MapOptions, ParallelExecutor, ProgressCallback};

// Per-point sub-task status
pub mod task;
pub use task::{EnrichmentTask, SubTask, SubTaskStatus};

// Kinematics and the per-point enrichment pass
pub mod enricher;
pub use enricher::{compute_kinematics, EnrichOptions, EnrichedTrack, TrackEnricher};

// GPX and JSON track I/O
pub mod track;
pub use track::{load_gpx, read_gpx, write_gpx, Route};

// TOML configuration
pub mod config;
pub use config::EnrichConfig;

// Shared pipeline state
pub mod context;
pub use context::EnrichContext;

// ============================================================================
// Core Types
// ============================================================================

/// A raw track sample as recorded by the device, in its native coordinate
/// system.
///
/// # Example
/// ```
/// use track_enricher::RawPoint;
/// let point = RawPoint::new(116.3975, 39.9087).with_elevation(44.0);
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawPoint {
    pub longitude: f64,
    pub latitude: f64,
    #[serde(default)]
    pub elevation: Option<f64>,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
    /// Bearing reported by the source, if any
    #[serde(default)]
    pub course: Option<f64>,
}

impl RawPoint {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
            elevation: None,
            time: None,
            course: None,
        }
    }

    pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
        self.time = Some(time);
        self
    }

    pub fn with_elevation(mut self, elevation: f64) -> Self {
        self.elevation = Some(elevation);
        self
    }

    pub fn with_course(mut self, course: f64) -> Self {
        self.course = Some(course);
        self
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        geo_utils::is_valid_lnglat(self.longitude, self.latitude)
    }
}

/// An enriched track point.
///
/// Kinematic fields are always populated. Transformed coordinates and region
/// labels are only present when that enrichment was requested and succeeded.
/// English label fields are never filled here; they are cleared whenever the
/// matching label changes so stale translations do not survive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub index: u32,
    pub time: DateTime<Utc>,
    /// Seconds since the first point
    pub elapsed_time: f64,
    pub longitude: f64,
    pub latitude: f64,
    #[serde(default)]
    pub longitude_transformed: Option<f64>,
    #[serde(default)]
    pub latitude_transformed: Option<f64>,
    #[serde(default)]
    pub elevation: Option<f64>,
    /// Cumulative meters from the first point
    pub distance: f64,
    /// Degrees clockwise from north, [0, 360)
    pub course: f64,
    /// Meters per second over the preceding segment
    pub speed: f64,
    #[serde(default)]
    pub province: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub area: Option<String>,
    #[serde(default)]
    pub province_en: Option<String>,
    #[serde(default)]
    pub city_en: Option<String>,
    #[serde(default)]
    pub area_en: Option<String>,
    #[serde(default)]
    pub road_num: Option<String>,
    #[serde(default)]
    pub road_name: Option<String>,
    #[serde(default)]
    pub road_name_en: Option<String>,
    #[serde(default)]
    pub memo: Option<String>,
}

impl GeoPoint {
    /// A point with kinematics only.
    pub fn new(index: u32, time: DateTime<Utc>, longitude: f64, latitude: f64) -> Self {
        Self {
            index,
            time,
            elapsed_time: 0.0,
            longitude,
            latitude,
            longitude_transformed: None,
            latitude_transformed: None,
            elevation: None,
            distance: 0.0,
            course: 0.0,
            speed: 0.0,
            province: None,
            city: None,
            area: None,
            province_en: None,
            city_en: None,
            area_en: None,
            road_num: None,
            road_name: None,
            road_name_en: None,
            memo: None,
        }
    }

    pub fn has_transformed(&self) -> bool {
        self.longitude_transformed.is_some() && self.latitude_transformed.is_some()
    }

    /// All three administrative labels are present.
    pub fn has_region(&self) -> bool {
        self.province.is_some() && self.city.is_some() && self.area.is_some()
    }

    pub fn set_transformed(&mut self, longitude: f64, latitude: f64) {
        self.longitude_transformed = Some(longitude);
        self.latitude_transformed = Some(latitude);
    }

    /// Transformed coordinates when present, native ones otherwise.
    pub fn display_coordinates(&self) -> (f64, f64) {
        match (self.longitude_transformed, self.latitude_transformed) {
            (Some(lng), Some(lat)) => (lng, lat),
            _ => (self.longitude, self.latitude),
        }
    }

    /// Overwrite region labels. `None` clears them.
    ///
    /// Each English label is cleared when its label changes. Returns whether
    /// any label changed.
    pub fn apply_region(&mut self, names: Option<&RegionNames>) -> bool {
        let province = names.map(|n| n.province.clone());
        let city = names.map(|n| n.city.clone());
        let area = names.map(|n| n.area.clone());

        let mut changed = false;
        changed |= replace_label(&mut self.province, &mut self.province_en, province);
        changed |= replace_label(&mut self.city, &mut self.city_en, city);
        changed |= replace_label(&mut self.area, &mut self.area_en, area);
        changed
    }
}

fn replace_label(label: &mut Option<String>, label_en: &mut Option<String>, new: Option<String>) -> bool {
    if *label == new {
        return false;
    }
    *label = new;
    *label_en = None;
    true
}

// ============================================================================
// Tests
// ============================================================================
