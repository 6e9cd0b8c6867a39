//! # Region Resolution
//!
//! Point → (province, city, district) lookup.
//!
//! Resolution is two steps:
//! 1. [`BoundaryLayers::find`] picks the first boundary polygon containing the
//!    point and yields its area code.
//! 2. [`RegionCodeIndex::lookup`] joins that code to its names.
//!
//! A point outside every polygon is a soft miss ([`EnrichError::RegionNotFound`]).
//! A polygon whose code has no index row means the boundary files and the
//! index disagree ([`EnrichError::RegionCodeIndexCorrupt`]).

pub mod boundary;
pub mod code_index;

pub use boundary::{BoundaryLayer, BoundaryLayers, BoundaryPolygon, SpatialIndexKind};
pub use code_index::{CacheStats, RegionCodeIndex, RegionNames};

use std::sync::Arc;

use log::warn;

use crate::error::{EnrichError, OptionExt, Result};

/// Shared, read-only region resolver.
///
/// Cloning is cheap; clones share the same layers and index.
#[derive(Debug, Clone)]
pub struct RegionResolver {
    layers: Arc<BoundaryLayers>,
    index: Arc<RegionCodeIndex>,
}

impl RegionResolver {
    pub fn new(layers: Arc<BoundaryLayers>, index: Arc<RegionCodeIndex>) -> Self {
        Self { layers, index }
    }

    /// Area code of the first polygon containing the point.
    pub fn locate(&self, lng: f64, lat: f64) -> Option<&str> {
        self.layers.find(lng, lat).map(|p| p.code.as_str())
    }

    /// Resolve names for a point.
    pub fn resolve(&self, lng: f64, lat: f64) -> Result<RegionNames> {
        let code = self.locate(lng, lat).ok_or_region_not_found(lng, lat)?;
        match self.index.lookup(code)? {
            Some(names) => Ok(names),
            None => {
                warn!(
                    "[RegionResolver] Code {} matched ({}, {}) but has no index entry",
                    code, lng, lat
                );
                Err(EnrichError::RegionCodeIndexCorrupt {
                    code: code.to_string(),
                })
            }
        }
    }

    /// Like [`resolve`](Self::resolve), with a miss mapped to `Ok(None)`.
    pub fn resolve_optional(&self, lng: f64, lat: f64) -> Result<Option<RegionNames>> {
        match self.resolve(lng, lat) {
            Ok(names) => Ok(Some(names)),
            Err(EnrichError::RegionNotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn layers(&self) -> &Arc<BoundaryLayers> {
        &self.layers
    }

    pub fn index(&self) -> &Arc<RegionCodeIndex> {
        &self.index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use geo::{polygon, MultiPolygon};
    use rusqlite::Connection;
    use tempfile::TempDir;

    fn square(code: &str, min_x: f64, min_y: f64, size: f64) -> BoundaryPolygon {
        let p = polygon![
            (x: min_x, y: min_y),
            (x: min_x + size, y: min_y),
            (x: min_x + size, y: min_y + size),
            (x: min_x, y: min_y + size),
            (x: min_x, y: min_y),
        ];
        BoundaryPolygon::new(code, None, MultiPolygon::new(vec![p])).unwrap()
    }

    fn resolver(kind: SpatialIndexKind) -> (TempDir, RegionResolver) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("area.sqlite");
        let conn = Connection::open(&path).unwrap();
        RegionCodeIndex::init_schema(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO province VALUES ('110000', 'Beijing');
             INSERT INTO city VALUES ('110100', 'Beijing City', '110000');
             INSERT INTO area VALUES ('110101', 'Dongcheng', '110100', '110000');
             INSERT INTO area VALUES ('110102', 'Xicheng', '110100', '110000');",
        )
        .unwrap();
        drop(conn);

        let layers = BoundaryLayers::new(vec![BoundaryLayer::new(
            "districts",
            vec![
                square("110101", 116.40, 39.90, 0.10),
                square("110102", 116.30, 39.90, 0.10),
                square("120101", 117.10, 39.10, 0.10),
            ],
            kind,
        )]);
        let index = RegionCodeIndex::open(&path, &PoolConfig::default(), 8).unwrap();
        (dir, RegionResolver::new(Arc::new(layers), Arc::new(index)))
    }

    #[test]
    fn test_resolve_inside_polygon() {
        for kind in [SpatialIndexKind::Linear, SpatialIndexKind::Envelope] {
            let (_dir, resolver) = resolver(kind);
            let names = resolver.resolve(116.45, 39.95).unwrap();
            assert_eq!(names.area, "Dongcheng");
            assert_eq!(names.city, "Beijing City");
            assert_eq!(names.province, "Beijing");
            assert_eq!(resolver.resolve(116.35, 39.95).unwrap().area, "Xicheng");
        }
    }

    #[test]
    fn test_outside_every_polygon() {
        let (_dir, resolver) = resolver(SpatialIndexKind::Envelope);
        assert!(matches!(
            resolver.resolve(100.0, 30.0),
            Err(EnrichError::RegionNotFound { .. })
        ));
        assert_eq!(resolver.resolve_optional(100.0, 30.0).unwrap(), None);
    }

    #[test]
    fn test_code_without_index_row_is_corrupt() {
        let (_dir, resolver) = resolver(SpatialIndexKind::Envelope);
        let err = resolver.resolve(117.15, 39.15).unwrap_err();
        assert_eq!(
            err,
            EnrichError::RegionCodeIndexCorrupt {
                code: "120101".to_string()
            }
        );
        // Not a soft miss
        assert!(resolver.resolve_optional(117.15, 39.15).is_err());
    }

    #[test]
    fn test_locate_returns_code() {
        let (_dir, resolver) = resolver(SpatialIndexKind::Linear);
        assert_eq!(resolver.locate(116.45, 39.95), Some("110101"));
        assert_eq!(resolver.locate(0.0, 0.0), None);
    }

    #[test]
    fn test_concurrent_resolution_shares_state() {
        let (_dir, resolver) = resolver(SpatialIndexKind::Envelope);
        std::thread::scope(|s| {
            for i in 0..8 {
                let resolver = resolver.clone();
                s.spawn(move || {
                    let lng = if i % 2 == 0 { 116.45 } else { 116.35 };
                    let expected = if i % 2 == 0 { "Dongcheng" } else { "Xicheng" };
                    for _ in 0..20 {
                        assert_eq!(resolver.resolve(lng, 39.95).unwrap().area, expected);
                    }
                });
            }
        });
        assert!(resolver.index().pool().stats().open <= 5);
        assert_eq!(resolver.index().pool().stats().in_use, 0);
    }
}
