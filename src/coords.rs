//! # Coordinate Systems
//!
//! Conversion between the three coordinate reference systems used by mainland
//! China map providers:
//!
//! | System | Used by |
//! |--------|---------|
//! | [`CoordinateSystem::Wgs84`] | GPS receivers, OpenStreetMap |
//! | [`CoordinateSystem::Gcj02`] | Amap/Gaode, Tencent, Google China |
//! | [`CoordinateSystem::Bd09`] | Baidu |
//!
//! GCJ02 adds a nonlinear offset to WGS84 inside the mainland bounding box;
//! BD09 adds a second polar-coordinate offset on top of GCJ02. Conversions
//! into WGS84 are approximate: the offset is evaluated at the obfuscated
//! coordinate and subtracted once. The residual is under a meter for most of
//! the country and stays below five meters everywhere in the mainland box.
//!
//! ## Example
//!
//! ```rust
//! use track_enricher::coords::{convert, CoordinateSystem};
//!
//! let (lng, lat) = convert(116.3975, 39.9087, CoordinateSystem::Wgs84, CoordinateSystem::Gcj02);
//! assert!(lng > 116.3975 && lat > 39.9087);
//! ```

use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{EnrichError, Result};

/// Semi-major axis of the Krasovsky 1940 ellipsoid.
const KRASOVSKY_A: f64 = 6_378_245.0;
/// Eccentricity squared of the Krasovsky 1940 ellipsoid.
const KRASOVSKY_EE: f64 = 0.006_693_421_622_965_943_23;
/// Baidu transform constant.
const X_PI: f64 = PI * 3000.0 / 180.0;

/// A geodetic coordinate system tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinateSystem {
    Wgs84,
    Gcj02,
    Bd09,
}

impl CoordinateSystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoordinateSystem::Wgs84 => "wgs84",
            CoordinateSystem::Gcj02 => "gcj02",
            CoordinateSystem::Bd09 => "bd09",
        }
    }
}

impl fmt::Display for CoordinateSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CoordinateSystem {
    type Err = EnrichError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wgs84" => Ok(CoordinateSystem::Wgs84),
            "gcj02" => Ok(CoordinateSystem::Gcj02),
            "bd09" => Ok(CoordinateSystem::Bd09),
            _ => Err(EnrichError::InvalidCoordinateSystem {
                name: s.to_string(),
            }),
        }
    }
}

// =============================================================================
// Public API
// =============================================================================

/// Convert a coordinate between two systems.
///
/// Identical systems return the input untouched.
pub fn convert(lng: f64, lat: f64, from: CoordinateSystem, to: CoordinateSystem) -> (f64, f64) {
    use CoordinateSystem::*;

    match (from, to) {
        (Wgs84, Wgs84) | (Gcj02, Gcj02) | (Bd09, Bd09) => (lng, lat),
        (Wgs84, Gcj02) => wgs84_to_gcj02(lng, lat),
        (Wgs84, Bd09) => {
            let (g_lng, g_lat) = wgs84_to_gcj02(lng, lat);
            gcj02_to_bd09(g_lng, g_lat)
        }
        (Gcj02, Wgs84) => gcj02_to_wgs84(lng, lat),
        (Gcj02, Bd09) => gcj02_to_bd09(lng, lat),
        (Bd09, Gcj02) => bd09_to_gcj02(lng, lat),
        (Bd09, Wgs84) => {
            let (g_lng, g_lat) = bd09_to_gcj02(lng, lat);
            gcj02_to_wgs84(g_lng, g_lat)
        }
    }
}

/// Convert using textual system tags such as `"wgs84"`.
///
/// Fails with [`EnrichError::InvalidCoordinateSystem`] for unknown tags.
pub fn convert_named(lng: f64, lat: f64, from: &str, to: &str) -> Result<(f64, f64)> {
    let from: CoordinateSystem = from.parse()?;
    let to: CoordinateSystem = to.parse()?;
    Ok(convert(lng, lat, from, to))
}

/// Whether the coordinate falls outside the mainland bounding box, where
/// GCJ02 is defined to equal WGS84.
#[inline]
pub fn out_of_china(lng: f64, lat: f64) -> bool {
    !(72.004..=137.8347).contains(&lng) || !(0.8293..=55.8271).contains(&lat)
}

// =============================================================================
// WGS84 <-> GCJ02
// =============================================================================

fn transform_lat(x: f64, y: f64) -> f64 {
    let mut ret = -100.0 + 2.0 * x + 3.0 * y + 0.2 * y * y + 0.1 * x * y + 0.2 * x.abs().sqrt();
    ret += (20.0 * (6.0 * x * PI).sin() + 20.0 * (2.0 * x * PI).sin()) * 2.0 / 3.0;
    ret += (20.0 * (y * PI).sin() + 40.0 * (y / 3.0 * PI).sin()) * 2.0 / 3.0;
    ret += (160.0 * (y / 12.0 * PI).sin() + 320.0 * (y * PI / 30.0).sin()) * 2.0 / 3.0;
    ret
}

fn transform_lng(x: f64, y: f64) -> f64 {
    let mut ret = 300.0 + x + 2.0 * y + 0.1 * x * x + 0.1 * x * y + 0.1 * x.abs().sqrt();
    ret += (20.0 * (6.0 * x * PI).sin() + 20.0 * (2.0 * x * PI).sin()) * 2.0 / 3.0;
    ret += (20.0 * (x * PI).sin() + 40.0 * (x / 3.0 * PI).sin()) * 2.0 / 3.0;
    ret += (150.0 * (x / 12.0 * PI).sin() + 300.0 * (x / 30.0 * PI).sin()) * 2.0 / 3.0;
    ret
}

/// GCJ02 offset (d_lng, d_lat) in degrees evaluated at the given coordinate.
fn gcj02_offset(lng: f64, lat: f64) -> (f64, f64) {
    let d_lat = transform_lat(lng - 105.0, lat - 35.0);
    let d_lng = transform_lng(lng - 105.0, lat - 35.0);

    let rad_lat = lat / 180.0 * PI;
    let magic = 1.0 - KRASOVSKY_EE * rad_lat.sin() * rad_lat.sin();
    let sqrt_magic = magic.sqrt();

    let d_lat = (d_lat * 180.0) / ((KRASOVSKY_A * (1.0 - KRASOVSKY_EE)) / (magic * sqrt_magic) * PI);
    let d_lng = (d_lng * 180.0) / (KRASOVSKY_A / sqrt_magic * rad_lat.cos() * PI);
    (d_lng, d_lat)
}

fn wgs84_to_gcj02(lng: f64, lat: f64) -> (f64, f64) {
    if out_of_china(lng, lat) {
        return (lng, lat);
    }
    let (d_lng, d_lat) = gcj02_offset(lng, lat);
    (lng + d_lng, lat + d_lat)
}

fn gcj02_to_wgs84(lng: f64, lat: f64) -> (f64, f64) {
    if out_of_china(lng, lat) {
        return (lng, lat);
    }
    let (d_lng, d_lat) = gcj02_offset(lng, lat);
    (lng - d_lng, lat - d_lat)
}

// =============================================================================
// GCJ02 <-> BD09
// =============================================================================

fn gcj02_to_bd09(lng: f64, lat: f64) -> (f64, f64) {
    let z = (lng * lng + lat * lat).sqrt() + 0.00002 * (lat * X_PI).sin();
    let theta = lat.atan2(lng) + 0.000003 * (lng * X_PI).cos();
    (z * theta.cos() + 0.0065, z * theta.sin() + 0.006)
}

fn bd09_to_gcj02(lng: f64, lat: f64) -> (f64, f64) {
    let x = lng - 0.0065;
    let y = lat - 0.006;
    let z = (x * x + y * y).sqrt() - 0.00002 * (y * X_PI).sin();
    let theta = y.atan2(x) - 0.000003 * (x * X_PI).cos();
    (z * theta.cos(), z * theta.sin())
}

// =============================================================================
// Tests
// =============================================================================
