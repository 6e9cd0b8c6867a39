//! # Track I/O
//!
//! GPX import/export and JSON (de)serialization of enriched routes.
//!
//! GPX files are read one track segment at a time into [`RawPoint`]s ready for
//! the kinematics pass. Enriched routes export back to GPX 1.1, optionally
//! with transformed coordinates in place of native ones.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use gpx::{Gpx, GpxVersion, Track, TrackSegment, Waypoint};
use log::info;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::config::CoordinateConfig;
use crate::coords::CoordinateSystem;
use crate::enricher::EnrichedTrack;
use crate::error::{EnrichError, OptionExt, Result};
use crate::{GeoPoint, RawPoint};

// ============================================================================
// Route
// ============================================================================

/// An enriched route with the coordinate systems its points are in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    #[serde(default)]
    pub name: Option<String>,
    /// System of `longitude`/`latitude`
    #[serde(default)]
    pub coordinate_system: Option<CoordinateSystem>,
    /// System of `longitude_transformed`/`latitude_transformed`
    #[serde(default)]
    pub transformed_coordinate_system: Option<CoordinateSystem>,
    pub points: Vec<GeoPoint>,
}

impl Route {
    pub fn new(points: Vec<GeoPoint>) -> Self {
        Self {
            name: None,
            coordinate_system: None,
            transformed_coordinate_system: None,
            points,
        }
    }

    /// Wrap enriched points, tagging the systems they were produced with.
    ///
    /// No transformed system is recorded when source and target match, since
    /// no point carries transformed coordinates then.
    pub fn from_enriched(track: EnrichedTrack, coordinates: &CoordinateConfig) -> Self {
        let transformed = (coordinates.source != coordinates.target).then_some(coordinates.target);
        Self {
            name: None,
            coordinate_system: Some(coordinates.source),
            transformed_coordinate_system: transformed,
            points: track.points,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Cumulative distance of the last point, in meters.
    pub fn total_distance(&self) -> f64 {
        self.points.last().map(|p| p.distance).unwrap_or(0.0)
    }

    /// Elapsed seconds of the last point.
    pub fn duration_seconds(&self) -> f64 {
        self.points.last().map(|p| p.elapsed_time).unwrap_or(0.0)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}

// ============================================================================
// GPX Import
// ============================================================================

/// Read one track segment from a GPX document.
///
/// Waypoints without a timestamp are kept; the kinematics pass rejects them.
pub fn read_gpx<R: Read>(reader: R, track_index: usize, segment_index: usize) -> Result<Vec<RawPoint>> {
    let gpx: Gpx = gpx::read(reader)?;
    let track = gpx
        .tracks
        .get(track_index)
        .ok_or_gpx(&format!("track {} not found ({} tracks)", track_index, gpx.tracks.len()))?;
    let segment = track.segments.get(segment_index).ok_or_gpx(&format!(
        "segment {} not found in track {} ({} segments)",
        segment_index,
        track_index,
        track.segments.len()
    ))?;

    segment
        .points
        .iter()
        .map(|waypoint| -> Result<RawPoint> {
            let point = waypoint.point();
            Ok(RawPoint {
                longitude: point.x(),
                latitude: point.y(),
                elevation: waypoint.elevation,
                time: waypoint.time.map(|t| to_chrono(t.into())).transpose()?,
                course: None,
            })
        })
        .collect()
}

/// Read one track segment from a GPX file.
pub fn load_gpx(path: impl AsRef<Path>, track_index: usize, segment_index: usize) -> Result<Vec<RawPoint>> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let points = read_gpx(BufReader::new(file), track_index, segment_index)?;
    info!(
        "[Track] Read {} points from {} (track {}, segment {})",
        points.len(),
        path.display(),
        track_index,
        segment_index
    );
    Ok(points)
}

// ============================================================================
// GPX Export
// ============================================================================

/// Write a route as a single-track GPX 1.1 document.
///
/// With `export_transformed`, each point uses its transformed coordinates
/// when it has them and its native coordinates otherwise.
pub fn write_gpx<W: Write>(route: &Route, writer: W, export_transformed: bool) -> Result<()> {
    let points = route
        .points
        .iter()
        .map(|p| -> Result<Waypoint> {
            let (lng, lat) = if export_transformed {
                p.display_coordinates()
            } else {
                (p.longitude, p.latitude)
            };
            let mut waypoint = Waypoint::new(geo::Point::new(lng, lat));
            waypoint.elevation = p.elevation;
            waypoint.time = Some(gpx::Time::from(to_offset(p.time)?));
            Ok(waypoint)
        })
        .collect::<Result<Vec<_>>>()?;

    let mut track = Track::new();
    track.name = route.name.clone();
    track.segments = vec![TrackSegment { points }];

    let gpx = Gpx {
        version: GpxVersion::Gpx11,
        creator: Some(concat!("track-enricher ", env!("CARGO_PKG_VERSION")).to_string()),
        tracks: vec![track],
        ..Default::default()
    };
    gpx::write(&gpx, writer)?;
    Ok(())
}

/// Write a route to a GPX file.
pub fn save_gpx(route: &Route, path: impl AsRef<Path>, export_transformed: bool) -> Result<()> {
    let writer = BufWriter::new(File::create(path)?);
    write_gpx(route, writer, export_transformed)
}

// ============================================================================
// Time Conversion
// ============================================================================

fn to_chrono(t: OffsetDateTime) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(t.unix_timestamp(), t.nanosecond()).ok_or_else(|| EnrichError::Gpx {
        message: format!("timestamp {} out of range", t),
    })
}

fn to_offset(t: DateTime<Utc>) -> Result<OffsetDateTime> {
    let nanos = i128::from(t.timestamp()) * 1_000_000_000 + i128::from(t.timestamp_subsec_nanos());
    OffsetDateTime::from_unix_timestamp_nanos(nanos).map_err(|e| EnrichError::Gpx {
        message: format!("timestamp {} out of range: {}", t, e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="test" xmlns="http://www.topografix.com/GPX/1/1">
  <trk>
    <name>Morning</name>
    <trkseg>
      <trkpt lat="39.9087" lon="116.3975"><ele>44.0</ele><time>2024-05-01T08:00:00Z</time></trkpt>
      <trkpt lat="39.9090" lon="116.3985"><ele>45.5</ele><time>2024-05-01T08:00:10Z</time></trkpt>
    </trkseg>
    <trkseg>
      <trkpt lat="31.2304" lon="121.4737"><time>2024-05-01T09:00:00Z</time></trkpt>
    </trkseg>
  </trk>
</gpx>"#;

    fn enriched_point(index: u32, lng: f64, lat: f64) -> GeoPoint {
        let mut p = GeoPoint::new(
            index,
            Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, index).unwrap(),
            lng,
            lat,
        );
        p.elevation = Some(50.0);
        p
    }

    #[test]
    fn test_read_gpx_segment() {
        let points = read_gpx(SAMPLE.as_bytes(), 0, 0).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].longitude, 116.3975);
        assert_eq!(points[0].latitude, 39.9087);
        assert_eq!(points[0].elevation, Some(44.0));
        assert_eq!(
            points[1].time,
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 10).unwrap())
        );

        let second = read_gpx(SAMPLE.as_bytes(), 0, 1).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].elevation, None);
    }

    #[test]
    fn test_read_gpx_missing_track_or_segment() {
        assert!(matches!(
            read_gpx(SAMPLE.as_bytes(), 1, 0),
            Err(EnrichError::Gpx { .. })
        ));
        assert!(matches!(
            read_gpx(SAMPLE.as_bytes(), 0, 5),
            Err(EnrichError::Gpx { .. })
        ));
        assert!(matches!(
            read_gpx("not xml".as_bytes(), 0, 0),
            Err(EnrichError::Gpx { .. })
        ));
    }

    #[test]
    fn test_write_gpx_uses_transformed_when_requested() {
        let mut with = enriched_point(0, 116.3975, 39.9087);
        with.set_transformed(116.4037, 39.9101);
        let without = enriched_point(1, 116.3985, 39.9090);
        let route = Route::new(vec![with, without]).with_name("export");

        let mut native = Vec::new();
        write_gpx(&route, &mut native, false).unwrap();
        let back = read_gpx(native.as_slice(), 0, 0).unwrap();
        assert!((back[0].longitude - 116.3975).abs() < 1e-7);

        let mut transformed = Vec::new();
        write_gpx(&route, &mut transformed, true).unwrap();
        let back = read_gpx(transformed.as_slice(), 0, 0).unwrap();
        assert!((back[0].longitude - 116.4037).abs() < 1e-7);
        assert!((back[0].latitude - 39.9101).abs() < 1e-7);
        // No transformed pair: native coordinates
        assert!((back[1].longitude - 116.3985).abs() < 1e-7);
        assert_eq!(back[1].time, Some(route.points[1].time));
        assert_eq!(back[1].elevation, Some(50.0));
    }

    #[test]
    fn test_route_json_round_trip() {
        let mut p = enriched_point(0, 116.3975, 39.9087);
        p.province = Some("北京市".to_string());
        p.road_name = Some("长安街".to_string());
        p.memo = Some("start".to_string());
        let mut route = Route::new(vec![p, enriched_point(1, 116.3985, 39.9090)]);
        route.coordinate_system = Some(CoordinateSystem::Wgs84);
        route.transformed_coordinate_system = Some(CoordinateSystem::Gcj02);

        let json = route.to_json().unwrap();
        assert!(json.contains("\"gcj02\""));
        assert_eq!(Route::from_json(&json).unwrap(), route);
    }

    #[test]
    fn test_route_json_keeps_full_float_precision() {
        let mut p = enriched_point(1, 116.50000000000001, 39.50100000000001);
        p.distance = 111.19957674417736;
        p.speed = 214.1591243395825 / 19.0;
        p.course = 359.99999999999994;
        p.set_transformed(116.50610727395013, 39.50234017830271);
        let route = Route::new(vec![enriched_point(0, 116.5, 39.5), p]);

        let back = Route::from_json(&route.to_json().unwrap()).unwrap();
        let (a, b) = (&route.points[1], &back.points[1]);
        assert_eq!(b.distance.to_bits(), a.distance.to_bits());
        assert_eq!(b.speed.to_bits(), a.speed.to_bits());
        assert_eq!(b.course.to_bits(), a.course.to_bits());
        assert_eq!(b.longitude.to_bits(), a.longitude.to_bits());
        assert_eq!(b.longitude_transformed, a.longitude_transformed);
        assert_eq!(back, route);
    }

    #[test]
    fn test_route_without_transform_has_no_target_system() {
        let points = vec![enriched_point(0, 116.0, 39.0)];
        let track = EnrichedTrack {
            task: crate::task::EnrichmentTask::new(points.len()),
            points,
        };
        let same = CoordinateConfig {
            source: CoordinateSystem::Gcj02,
            target: CoordinateSystem::Gcj02,
        };
        let route = Route::from_enriched(track.clone(), &same);
        assert_eq!(route.coordinate_system, Some(CoordinateSystem::Gcj02));
        assert_eq!(route.transformed_coordinate_system, None);

        let route = Route::from_enriched(track, &CoordinateConfig::default());
        assert_eq!(route.transformed_coordinate_system, Some(CoordinateSystem::Gcj02));
    }

    #[test]
    fn test_route_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("route.json");
        let route = Route::new(vec![enriched_point(0, 116.0, 39.0)]);
        route.save_json(&path).unwrap();
        assert_eq!(Route::load_json(&path).unwrap(), route);
        assert!(matches!(
            Route::load_json(dir.path().join("absent.json")),
            Err(EnrichError::Io { .. })
        ));
    }

    #[test]
    fn test_route_totals() {
        let mut last = enriched_point(1, 116.0, 39.0);
        last.distance = 1234.5;
        last.elapsed_time = 60.0;
        let route = Route::new(vec![enriched_point(0, 116.0, 39.0), last]);
        assert_eq!(route.total_distance(), 1234.5);
        assert_eq!(route.duration_seconds(), 60.0);
        assert_eq!(Route::new(vec![]).total_distance(), 0.0);
    }

    #[test]
    fn test_time_conversion_keeps_subseconds() {
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap() + chrono::Duration::milliseconds(250);
        assert_eq!(to_chrono(to_offset(t).unwrap()).unwrap(), t);
    }
}
