//! # Boundary Layers
//!
//! Administrative boundary polygons loaded from GeoJSON, with a pluggable
//! candidate pre-filter for point containment.
//!
//! A directory of boundary files becomes an ordered list of layers (one per
//! file, sorted by file name). Lookups walk layers in order and polygons
//! within a layer in load order; the first polygon whose interior contains
//! the point wins. Points exactly on an edge are outside.
//!
//! Both candidate strategies yield polygon indices in ascending load order,
//! so switching between them never changes which polygon wins.

use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Instant;

use geo::{BoundingRect, Contains, Geometry, MultiPolygon, Point, Rect};
use log::{debug, info, warn};
use rstar::{RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};

use crate::error::{EnrichError, Result};

/// Property keys checked, in order, for a feature's region code.
const CODE_PROPERTIES: [&str; 3] = ["id", "code", "adcode"];

// ============================================================================
// Candidate Index
// ============================================================================

/// Strategy used to narrow the polygons tested for containment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpatialIndexKind {
    /// Test every polygon in load order.
    Linear,
    /// R-tree over polygon bounding boxes.
    #[default]
    Envelope,
}

impl FromStr for SpatialIndexKind {
    type Err = EnrichError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linear" => Ok(SpatialIndexKind::Linear),
            "envelope" | "rtree" => Ok(SpatialIndexKind::Envelope),
            other => Err(EnrichError::Config {
                key: "spatial.index".to_string(),
                message: format!("unknown index '{}', expected linear or envelope", other),
            }),
        }
    }
}

/// Bounding box of one polygon, tagged with its position in the layer.
#[derive(Debug, Clone, Copy)]
struct PolygonEnvelope {
    position: usize,
    min: [f64; 2],
    max: [f64; 2],
}

impl RTreeObject for PolygonEnvelope {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(self.min, self.max)
    }
}

enum CandidateIndex {
    Linear,
    Envelope(RTree<PolygonEnvelope>),
}

impl std::fmt::Debug for CandidateIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CandidateIndex::Linear => f.write_str("Linear"),
            CandidateIndex::Envelope(tree) => write!(f, "Envelope({} boxes)", tree.size()),
        }
    }
}

impl CandidateIndex {
    fn build(kind: SpatialIndexKind, polygons: &[BoundaryPolygon]) -> Self {
        match kind {
            SpatialIndexKind::Linear => CandidateIndex::Linear,
            SpatialIndexKind::Envelope => {
                let envelopes = polygons
                    .iter()
                    .enumerate()
                    .map(|(position, p)| PolygonEnvelope {
                        position,
                        min: [p.bounds.min().x, p.bounds.min().y],
                        max: [p.bounds.max().x, p.bounds.max().y],
                    })
                    .collect();
                CandidateIndex::Envelope(RTree::bulk_load(envelopes))
            }
        }
    }

    fn kind(&self) -> SpatialIndexKind {
        match self {
            CandidateIndex::Linear => SpatialIndexKind::Linear,
            CandidateIndex::Envelope(_) => SpatialIndexKind::Envelope,
        }
    }
}

// ============================================================================
// Polygons and Layers
// ============================================================================

/// One region outline with its administrative code.
#[derive(Debug, Clone)]
pub struct BoundaryPolygon {
    pub code: String,
    pub name: Option<String>,
    pub geometry: MultiPolygon<f64>,
    pub bounds: Rect<f64>,
}

impl BoundaryPolygon {
    /// Wrap a geometry. Returns `None` for an empty multipolygon.
    pub fn new(
        code: impl Into<String>,
        name: Option<String>,
        geometry: MultiPolygon<f64>,
    ) -> Option<Self> {
        let bounds = geometry.bounding_rect()?;
        Some(Self {
            code: code.into(),
            name,
            geometry,
            bounds,
        })
    }

    /// Strict interior containment.
    pub fn contains(&self, lng: f64, lat: f64) -> bool {
        self.geometry.contains(&Point::new(lng, lat))
    }
}

/// A named, immutable set of boundary polygons.
#[derive(Debug)]
pub struct BoundaryLayer {
    name: String,
    polygons: Vec<BoundaryPolygon>,
    index: CandidateIndex,
}

impl BoundaryLayer {
    pub fn new(name: impl Into<String>, polygons: Vec<BoundaryPolygon>, kind: SpatialIndexKind) -> Self {
        let index = CandidateIndex::build(kind, &polygons);
        Self {
            name: name.into(),
            polygons,
            index,
        }
    }

    /// Parse a GeoJSON FeatureCollection (or single Feature).
    ///
    /// Features must carry a Polygon or MultiPolygon geometry and a region
    /// code. Other geometry types are skipped.
    pub fn from_geojson_str(name: &str, content: &str, kind: SpatialIndexKind) -> Result<Self> {
        let load_error = |message: String| EnrichError::BoundaryLoad {
            path: name.to_string(),
            message,
        };

        let parsed: geojson::GeoJson = content
            .parse()
            .map_err(|e: geojson::Error| load_error(e.to_string()))?;

        let features = match parsed {
            geojson::GeoJson::FeatureCollection(fc) => fc.features,
            geojson::GeoJson::Feature(feature) => vec![feature],
            geojson::GeoJson::Geometry(_) => {
                return Err(load_error(
                    "bare geometry has no region code, expected features".to_string(),
                ))
            }
        };

        let mut polygons = Vec::with_capacity(features.len());
        for (i, feature) in features.into_iter().enumerate() {
            let code = feature_code(&feature)
                .ok_or_else(|| load_error(format!("feature {} has no region code", i)))?;
            let region_name = feature
                .property("name")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            let label = region_name.clone().unwrap_or_else(|| code.clone());

            let Some(geometry) = feature.geometry else {
                warn!("[Boundary] {}: feature {} ({}) has no geometry, skipped", name, i, label);
                continue;
            };
            let geometry = Geometry::<f64>::try_from(geometry.value)
                .map_err(|e| load_error(format!("feature {}: {}", i, e)))?;
            let multi = match geometry {
                Geometry::Polygon(p) => MultiPolygon::new(vec![p]),
                Geometry::MultiPolygon(mp) => mp,
                other => {
                    debug!(
                        "[Boundary] {}: feature {} ({}) is a {}, skipped",
                        name,
                        i,
                        label,
                        geometry_kind(&other)
                    );
                    continue;
                }
            };

            match BoundaryPolygon::new(code, region_name, multi) {
                Some(polygon) => polygons.push(polygon),
                None => warn!(
                    "[Boundary] {}: feature {} ({}) has an empty polygon, skipped",
                    name, i, label
                ),
            }
        }

        Ok(Self::new(name, polygons, kind))
    }

    /// Load one boundary file. The layer is named after the file stem.
    pub fn from_file(path: &Path, kind: SpatialIndexKind) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| EnrichError::BoundaryLoad {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::from_geojson_str(&name, &content, kind).map_err(|e| match e {
            EnrichError::BoundaryLoad { message, .. } => EnrichError::BoundaryLoad {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn polygons(&self) -> &[BoundaryPolygon] {
        &self.polygons
    }

    pub fn len(&self) -> usize {
        self.polygons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty()
    }

    pub fn index_kind(&self) -> SpatialIndexKind {
        self.index.kind()
    }

    /// Positions of polygons whose bounding box may contain the point,
    /// ascending.
    pub fn candidates(&self, lng: f64, lat: f64) -> Vec<usize> {
        match &self.index {
            CandidateIndex::Linear => (0..self.polygons.len()).collect(),
            CandidateIndex::Envelope(tree) => {
                let mut hits: Vec<usize> = tree
                    .locate_in_envelope_intersecting(&AABB::from_point([lng, lat]))
                    .map(|e| e.position)
                    .collect();
                hits.sort_unstable();
                hits
            }
        }
    }

    /// First polygon, in load order, whose interior contains the point.
    pub fn find(&self, lng: f64, lat: f64) -> Option<&BoundaryPolygon> {
        self.candidates(lng, lat)
            .into_iter()
            .map(|i| &self.polygons[i])
            .find(|p| p.contains(lng, lat))
    }
}

/// Ordered boundary layers, searched first to last.
#[derive(Debug, Default)]
pub struct BoundaryLayers {
    layers: Vec<BoundaryLayer>,
}

impl BoundaryLayers {
    pub fn new(layers: Vec<BoundaryLayer>) -> Self {
        Self { layers }
    }

    /// Load every `.json`/`.geojson` file in `dir`, ordered by file name.
    pub fn load_dir(dir: impl AsRef<Path>, kind: SpatialIndexKind) -> Result<Self> {
        let dir = dir.as_ref();
        let start = Instant::now();
        let dir_error = |e: std::io::Error| EnrichError::BoundaryLoad {
            path: dir.display().to_string(),
            message: e.to_string(),
        };

        let mut files = Vec::new();
        for entry in fs::read_dir(dir).map_err(dir_error)? {
            let path = entry.map_err(dir_error)?.path();
            if path.is_file() && is_boundary_file(&path) {
                files.push(path);
            }
        }
        files.sort();

        let layers = files
            .iter()
            .map(|path| BoundaryLayer::from_file(path, kind))
            .collect::<Result<Vec<_>>>()?;

        let loaded = Self::new(layers);
        if loaded.is_empty() {
            warn!("[Boundary] No boundary files found in {}", dir.display());
        }
        info!(
            "[Boundary] Loaded {} layers ({} polygons, {:?} index) from {} in {:?}",
            loaded.len(),
            loaded.polygon_count(),
            kind,
            dir.display(),
            start.elapsed()
        );
        Ok(loaded)
    }

    pub fn layers(&self) -> &[BoundaryLayer] {
        &self.layers
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn polygon_count(&self) -> usize {
        self.layers.iter().map(BoundaryLayer::len).sum()
    }

    /// First containing polygon across all layers.
    pub fn find(&self, lng: f64, lat: f64) -> Option<&BoundaryPolygon> {
        self.layers.iter().find_map(|layer| layer.find(lng, lat))
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn is_boundary_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("json") || e.eq_ignore_ascii_case("geojson"))
        .unwrap_or(false)
}

fn feature_code(feature: &geojson::Feature) -> Option<String> {
    CODE_PROPERTIES
        .iter()
        .find_map(|key| feature.property(key).and_then(json_code))
        .or_else(|| {
            feature.id.as_ref().map(|id| match id {
                geojson::feature::Id::String(s) => s.clone(),
                geojson::feature::Id::Number(n) => n.to_string(),
            })
        })
}

fn json_code(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn geometry_kind(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    }
}
