//! # Geographic Utilities
//!
//! Distance and bearing primitives used by the kinematics pass.
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`haversine_distance_lnglat`] | Great-circle distance between two coordinates |
//! | [`distance_3d`] | Great-circle distance combined with elevation difference |
//! | [`initial_bearing`] | Forward azimuth from one coordinate to another |
//! | [`is_valid_lnglat`] | Finite, in-range longitude/latitude check |
//!
//! All functions take longitude first, matching the order used by GeoJSON and
//! by [`crate::coords`].

use geo::{Distance, Haversine, Point};

// =============================================================================
// Distance Functions
// =============================================================================

/// Great-circle distance in meters between two coordinates.
#[inline]
pub fn haversine_distance_lnglat(lng1: f64, lat1: f64, lng2: f64, lat2: f64) -> f64 {
    Haversine::distance(Point::new(lng1, lat1), Point::new(lng2, lat2))
}

/// Distance in meters between two samples, accounting for elevation when
/// both samples carry one.
///
/// # Example
///
/// ```rust
/// use track_enricher::geo_utils::distance_3d;
///
/// let flat = distance_3d((116.0, 39.0, None), (116.0, 39.001, None));
/// let climb = distance_3d((116.0, 39.0, Some(0.0)), (116.0, 39.001, Some(50.0)));
/// assert!(climb > flat);
/// ```
pub fn distance_3d(from: (f64, f64, Option<f64>), to: (f64, f64, Option<f64>)) -> f64 {
    let planar = haversine_distance_lnglat(from.0, from.1, to.0, to.1);
    match (from.2, to.2) {
        (Some(e1), Some(e2)) if e1 != e2 => {
            let dz = e2 - e1;
            (planar * planar + dz * dz).sqrt()
        }
        _ => planar,
    }
}

// =============================================================================
// Bearing
// =============================================================================

/// Initial bearing (forward azimuth) in degrees [0, 360) from the first
/// coordinate to the second.
///
/// Colocated points yield exactly 0.
pub fn initial_bearing(lng1: f64, lat1: f64, lng2: f64, lat2: f64) -> f64 {
    let lat1 = lat1.to_radians();
    let lat2 = lat2.to_radians();
    let d_lng = (lng2 - lng1).to_radians();

    let x = lat2.cos() * d_lng.sin();
    let y = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * d_lng.cos();
    let bearing = x.atan2(y).to_degrees();
    (bearing + 360.0) % 360.0
}

// =============================================================================
// Validation
// =============================================================================

/// Check that a coordinate is finite and within geodetic ranges.
#[inline]
pub fn is_valid_lnglat(lng: f64, lat: f64) -> bool {
    lng.is_finite()
        && lat.is_finite()
        && (-180.0..=180.0).contains(&lng)
        && (-90.0..=90.0).contains(&lat)
}
