//! # Track Enricher
//!
//! Turns raw samples into enriched [`GeoPoint`]s in two passes.
//!
//! 1. **Kinematics** (sequential). Cumulative distance, speed, course and
//!    elapsed time depend on the previous point, so this pass walks the track
//!    in order. Any bad timestamp or coordinate aborts the whole batch.
//! 2. **Coordinates and regions** (parallel). Each point is transformed and
//!    resolved independently on the executor. A failure is recorded in that
//!    point's [`SubTask`]; the point keeps the steps that did succeed, so a
//!    failed region lookup still leaves transformed coordinates in place.
//!    Other points are unaffected.
//!
//! Output order and length always match the input.

use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::CoordinateConfig;
use crate::coords::convert;
use crate::error::{EnrichError, Result};
use crate::executor::{MapOptions, ParallelExecutor};
use crate::geo_utils::{distance_3d, initial_bearing, is_valid_lnglat};
use crate::region::RegionResolver;
use crate::task::{EnrichmentTask, SubTask};
use crate::{GeoPoint, RawPoint};

/// What the per-point pass should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichOptions {
    /// Fill transformed coordinates. Default: true
    pub transform: bool,
    /// Fill province/city/district labels. Default: true
    pub resolve_regions: bool,
    /// Overwrite fields that are already populated. Default: false
    pub force: bool,
}

impl Default for EnrichOptions {
    fn default() -> Self {
        Self {
            transform: true,
            resolve_regions: true,
            force: false,
        }
    }
}

/// Enriched points plus one sub-task per point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedTrack {
    pub points: Vec<GeoPoint>,
    pub task: EnrichmentTask,
}

// ============================================================================
// Kinematics
// ============================================================================

/// Compute index, elapsed time, cumulative distance, speed and course.
///
/// - The first point has distance, speed, course and elapsed time 0.
/// - Segment distance includes elevation change when both ends have one.
/// - Speed is segment distance over the time gap, or 0 for a zero gap.
/// - Course is the source bearing when present and non-zero, otherwise the
///   bearing from the previous point. A computed bearing of exactly 0
///   (colocated points) keeps the previous course.
///
/// Fails on the first point with invalid coordinates, a missing timestamp, or
/// a timestamp earlier than its predecessor.
pub fn compute_kinematics(raw: &[RawPoint]) -> Result<Vec<GeoPoint>> {
    let mut points: Vec<GeoPoint> = Vec::with_capacity(raw.len());
    let mut total_distance = 0.0;
    let mut course = 0.0;

    for (i, sample) in raw.iter().enumerate() {
        let index = i as u32;
        if !sample.is_valid() {
            return Err(EnrichError::InvalidCoordinates {
                index,
                message: format!("({}, {}) is not a valid position", sample.longitude, sample.latitude),
            });
        }
        let time = sample.time.ok_or(EnrichError::MissingTimestamp { index })?;

        let mut point = GeoPoint::new(index, time, sample.longitude, sample.latitude);
        point.elevation = sample.elevation;

        if let (Some(first), Some(prev)) = (points.first(), points.last()) {
            if time < prev.time {
                return Err(EnrichError::NonMonotonicTimestamp {
                    index,
                    previous_index: prev.index,
                    previous: prev.time.to_rfc3339(),
                    current: time.to_rfc3339(),
                });
            }

            let segment = distance_3d(
                (prev.longitude, prev.latitude, prev.elevation),
                (sample.longitude, sample.latitude, sample.elevation),
            );
            let gap = seconds_between(prev.time, time);
            let speed = if gap > 0.0 { segment / gap } else { 0.0 };

            course = match sample.course {
                Some(c) if c != 0.0 && c.is_finite() => c.rem_euclid(360.0),
                _ => {
                    let bearing =
                        initial_bearing(prev.longitude, prev.latitude, sample.longitude, sample.latitude);
                    if bearing != 0.0 {
                        bearing
                    } else {
                        course
                    }
                }
            };

            total_distance += segment;
            point.elapsed_time = seconds_between(first.time, time);
            point.distance = total_distance;
            point.speed = speed;
            point.course = course;
        }

        points.push(point);
    }

    debug!(
        "[Kinematics] {} points, {:.1}m total",
        points.len(),
        total_distance
    );
    Ok(points)
}

fn seconds_between(from: chrono::DateTime<chrono::Utc>, to: chrono::DateTime<chrono::Utc>) -> f64 {
    let delta = to - from;
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        None => delta.num_milliseconds() as f64 / 1000.0,
    }
}

// ============================================================================
// Per-point Pass
// ============================================================================

/// Runs both enrichment passes over a track.
#[derive(Debug, Clone)]
pub struct TrackEnricher {
    executor: Arc<ParallelExecutor>,
    resolver: Option<RegionResolver>,
    coordinates: CoordinateConfig,
    map_options: MapOptions,
}

impl TrackEnricher {
    /// `resolver` may be `None` when region resolution is never requested.
    pub fn new(
        executor: Arc<ParallelExecutor>,
        resolver: Option<RegionResolver>,
        coordinates: CoordinateConfig,
    ) -> Self {
        Self {
            executor,
            resolver,
            coordinates,
            map_options: MapOptions::default(),
        }
    }

    /// Progress/cancellation for the parallel pass. Result order is always
    /// preserved regardless of `options.order`.
    pub fn with_map_options(mut self, options: MapOptions) -> Self {
        self.map_options = options;
        self
    }

    pub fn coordinates(&self) -> CoordinateConfig {
        self.coordinates
    }

    pub fn resolver(&self) -> Option<&RegionResolver> {
        self.resolver.as_ref()
    }

    /// Kinematics, then the per-point pass.
    pub fn enrich(&self, raw: &[RawPoint], options: &EnrichOptions) -> Result<EnrichedTrack> {
        let points = compute_kinematics(raw)?;
        self.enrich_points(points, options)
    }

    /// Per-point pass only, over points that already carry kinematics.
    pub fn enrich_points(&self, points: Vec<GeoPoint>, options: &EnrichOptions) -> Result<EnrichedTrack> {
        self.check_options(options)?;
        let start = Instant::now();

        let map_options = MapOptions {
            order: Default::default(),
            ..self.map_options.clone()
        };
        let outcomes = self
            .executor
            .map(&points, |point| self.enrich_one(point, options), &map_options)?;

        let mut sub_tasks = Vec::with_capacity(outcomes.len());
        let mut enriched = Vec::with_capacity(outcomes.len());
        for (point, error) in outcomes {
            match error {
                None => sub_tasks.push(SubTask::succeeded(point.index)),
                Some(e) => {
                    warn!("[TrackEnricher] Point {} failed: {}", point.index, e);
                    sub_tasks.push(SubTask::failed(point.index, &e));
                }
            }
            enriched.push(point);
        }

        let task = EnrichmentTask::from_sub_tasks(sub_tasks);
        info!(
            "[TrackEnricher] Enriched {} points ({} failed) in {:?}",
            task.total(),
            task.failed(),
            start.elapsed()
        );
        Ok(EnrichedTrack {
            points: enriched,
            task,
        })
    }

    /// Re-run the per-point pass for one point, updating it in place with
    /// whatever steps succeed.
    pub fn retry_point(&self, point: &mut GeoPoint, options: &EnrichOptions) -> SubTask {
        let error = match self.check_options(options) {
            Ok(()) => {
                let (updated, error) = self.enrich_one(point, options);
                *point = updated;
                error
            }
            Err(e) => Some(e),
        };
        match error {
            None => SubTask::succeeded(point.index),
            Some(e) => {
                warn!("[TrackEnricher] Retry of point {} failed: {}", point.index, e);
                SubTask::failed(point.index, &e)
            }
        }
    }

    fn check_options(&self, options: &EnrichOptions) -> Result<()> {
        if options.resolve_regions && self.resolver.is_none() {
            return Err(EnrichError::Config {
                key: "area_info".to_string(),
                message: "region resolution requested without boundary layers and code index"
                    .to_string(),
            });
        }
        Ok(())
    }

    /// Transform, then resolve. Returns the point with every step that
    /// succeeded applied, plus the error of the step that failed.
    fn enrich_one(&self, point: &GeoPoint, options: &EnrichOptions) -> (GeoPoint, Option<EnrichError>) {
        let mut out = point.clone();

        if !is_valid_lnglat(point.longitude, point.latitude) {
            let error = EnrichError::InvalidCoordinates {
                index: point.index,
                message: format!("({}, {}) is not a valid position", point.longitude, point.latitude),
            };
            return (out, Some(error));
        }

        // Same source and target: nothing to transform, fields stay as they are.
        let converts = self.coordinates.source != self.coordinates.target;
        if options.transform && converts && (options.force || !out.has_transformed()) {
            let (lng, lat) = convert(
                out.longitude,
                out.latitude,
                self.coordinates.source,
                self.coordinates.target,
            );
            out.set_transformed(lng, lat);
        }

        if options.resolve_regions && (options.force || !out.has_region()) {
            if let Some(resolver) = &self.resolver {
                match resolver.resolve_optional(out.longitude, out.latitude) {
                    Ok(names) => {
                        out.apply_region(names.as_ref());
                    }
                    Err(e) => return (out, Some(e)),
                }
            }
        }

        (out, None)
    }
}
