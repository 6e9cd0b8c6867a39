//! # Enrichment Context
//!
//! Owns everything the pipeline shares across tracks: configuration, the
//! worker pool, boundary layers and the region code index.
//!
//! Boundary layers and the code index are loaded on first use (or eagerly via
//! [`EnrichContext::preload`]) and then shared read-only. Loading happens
//! once even when several threads ask at the same time.
//!
//! ```rust,no_run
//! use track_enricher::{EnrichConfig, EnrichContext, load_gpx};
//!
//! let config = EnrichConfig::from_file("enrich.toml")?;
//! let context = EnrichContext::new(config)?;
//! context.preload()?;
//!
//! let raw = load_gpx("ride.gpx", 0, 0)?;
//! let track = context.enrich(&raw)?;
//! println!("{} points, {} failed", track.points.len(), track.task.failed());
//! # Ok::<(), track_enricher::EnrichError>(())
//! ```

use std::sync::Arc;
use std::time::Instant;

use log::info;
use once_cell::sync::OnceCell;

use crate::config::EnrichConfig;
use crate::enricher::{EnrichedTrack, TrackEnricher};
use crate::error::Result;
use crate::executor::ParallelExecutor;
use crate::region::{BoundaryLayers, RegionCodeIndex, RegionResolver};
use crate::RawPoint;

/// Shared pipeline state. Create one per process (or per configuration) and
/// hand out resolvers/enrichers from it.
#[derive(Debug)]
pub struct EnrichContext {
    config: EnrichConfig,
    executor: Arc<ParallelExecutor>,
    layers: OnceCell<Arc<BoundaryLayers>>,
    index: OnceCell<Arc<RegionCodeIndex>>,
}

impl EnrichContext {
    /// Validate `config` and build the worker pool. Region data loads lazily.
    pub fn new(config: EnrichConfig) -> Result<Self> {
        config.validate()?;
        let executor = Arc::new(ParallelExecutor::new(config.executor.concurrency)?);
        Ok(Self {
            config,
            executor,
            layers: OnceCell::new(),
            index: OnceCell::new(),
        })
    }

    /// A context over pre-built parts, with default settings otherwise.
    pub fn with_parts(
        layers: Arc<BoundaryLayers>,
        index: Arc<RegionCodeIndex>,
        executor: Arc<ParallelExecutor>,
    ) -> Self {
        let mut config = EnrichConfig::default();
        config.executor.concurrency = executor.concurrency();
        Self {
            config,
            executor,
            layers: OnceCell::with_value(layers),
            index: OnceCell::with_value(index),
        }
    }

    /// Replace the configuration after validating it.
    ///
    /// The worker pool is rebuilt when the concurrency changes. Loaded
    /// boundary layers or the code index are dropped when the settings they
    /// were loaded with change, and reload on next use.
    pub fn with_config(mut self, config: EnrichConfig) -> Result<Self> {
        config.validate()?;

        if config.executor.concurrency != self.executor.concurrency() {
            self.executor = Arc::new(ParallelExecutor::new(config.executor.concurrency)?);
        }

        let old = &self.config;
        if config.area_info.boundary_dir != old.area_info.boundary_dir || config.spatial != old.spatial {
            self.layers = OnceCell::new();
        }
        if config.area_info.code_index_path != old.area_info.code_index_path
            || config.area_info.cache_capacity != old.area_info.cache_capacity
            || config.pool != old.pool
        {
            self.index = OnceCell::new();
        }

        self.config = config;
        Ok(self)
    }

    pub fn config(&self) -> &EnrichConfig {
        &self.config
    }

    pub fn executor(&self) -> &Arc<ParallelExecutor> {
        &self.executor
    }

    /// Boundary layers, loading them on first call.
    pub fn layers(&self) -> Result<&Arc<BoundaryLayers>> {
        self.layers.get_or_try_init(|| {
            let dir = self.config.boundary_dir()?;
            info!("[EnrichContext] Loading boundary layers from {}", dir.display());
            BoundaryLayers::load_dir(dir, self.config.spatial.index).map(Arc::new)
        })
    }

    /// Region code index, opening it on first call.
    pub fn code_index(&self) -> Result<&Arc<RegionCodeIndex>> {
        self.index.get_or_try_init(|| {
            let path = self.config.code_index_path()?;
            info!("[EnrichContext] Opening region code index {}", path.display());
            RegionCodeIndex::open(path, &self.config.pool, self.config.area_info.cache_capacity)
                .map(Arc::new)
        })
    }

    /// Load boundary layers and open the code index now.
    pub fn preload(&self) -> Result<()> {
        let start = Instant::now();
        let layers = self.layers()?;
        self.code_index()?;
        info!(
            "[EnrichContext] Region data ready ({} layers, {} polygons) in {:?}",
            layers.len(),
            layers.polygon_count(),
            start.elapsed()
        );
        Ok(())
    }

    /// Whether both boundary layers and the code index are loaded.
    pub fn is_loaded(&self) -> bool {
        self.layers.get().is_some() && self.index.get().is_some()
    }

    /// Whether region resolution can work: either loaded or configured.
    pub fn has_region_data(&self) -> bool {
        let configured = self.config.area_info.boundary_dir.is_some()
            && self.config.area_info.code_index_path.is_some();
        self.is_loaded() || configured
    }

    pub fn resolver(&self) -> Result<RegionResolver> {
        Ok(RegionResolver::new(
            Arc::clone(self.layers()?),
            Arc::clone(self.code_index()?),
        ))
    }

    /// An enricher sharing this context's pool and region data.
    ///
    /// Region data is only loaded when the configured options resolve
    /// regions. Without it the enricher can still transform coordinates.
    pub fn enricher(&self) -> Result<TrackEnricher> {
        let resolver = if self.config.enrich.resolve_regions && self.has_region_data() {
            Some(self.resolver()?)
        } else {
            None
        };
        Ok(TrackEnricher::new(
            Arc::clone(&self.executor),
            resolver,
            self.config.coordinate,
        ))
    }

    /// Enrich a raw track with the configured options.
    pub fn enrich(&self, raw: &[RawPoint]) -> Result<EnrichedTrack> {
        self.enricher()?.enrich(raw, &self.config.enrich)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EnrichError;
    use crate::region::SpatialIndexKind;
    use chrono::{TimeZone, Utc};
    use rusqlite::Connection;
    use std::fs;
    use std::path::Path;

    fn write_fixtures(root: &Path) {
        let boundaries = root.join("boundaries");
        fs::create_dir(&boundaries).unwrap();
        fs::write(
            boundaries.join("beijing.geojson"),
            r#"{"type": "FeatureCollection", "features": [{"type": "Feature",
                "properties": {"id": "110101", "name": "Dongcheng"},
                "geometry": {"type": "Polygon", "coordinates": [[[116.0,39.0],[117.0,39.0],[117.0,40.0],[116.0,40.0],[116.0,39.0]]]}}]}"#,
        )
        .unwrap();

        let conn = Connection::open(root.join("area.sqlite")).unwrap();
        RegionCodeIndex::init_schema(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO province VALUES ('110000', 'Beijing');
             INSERT INTO city VALUES ('110100', 'Beijing City', '110000');
             INSERT INTO area VALUES ('110101', 'Dongcheng', '110100', '110000');",
        )
        .unwrap();
    }

    fn config_for(root: &Path) -> EnrichConfig {
        let mut config = EnrichConfig::default();
        config.area_info.boundary_dir = Some(root.join("boundaries"));
        config.area_info.code_index_path = Some(root.join("area.sqlite"));
        config.executor.concurrency = 2;
        config
    }

    #[test]
    fn test_lazy_loading() {
        let dir = tempfile::tempdir().unwrap();
        write_fixtures(dir.path());
        let context = EnrichContext::new(config_for(dir.path())).unwrap();

        assert!(!context.is_loaded());
        assert!(context.has_region_data());
        let names = context.resolver().unwrap().resolve(116.5, 39.5).unwrap();
        assert_eq!(names.area, "Dongcheng");
        assert!(context.is_loaded());
    }

    #[test]
    fn test_layers_shared_between_resolvers() {
        let dir = tempfile::tempdir().unwrap();
        write_fixtures(dir.path());
        let context = EnrichContext::new(config_for(dir.path())).unwrap();
        context.preload().unwrap();

        let a = context.resolver().unwrap();
        let b = context.resolver().unwrap();
        assert!(Arc::ptr_eq(a.layers(), b.layers()));
        assert!(Arc::ptr_eq(a.index(), b.index()));
    }

    #[test]
    fn test_enrich_with_config_options() {
        let dir = tempfile::tempdir().unwrap();
        write_fixtures(dir.path());
        let context = EnrichContext::new(config_for(dir.path())).unwrap();

        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let raw = vec![
            RawPoint::new(116.5, 39.5).with_time(t0),
            RawPoint::new(116.501, 39.5).with_time(t0 + chrono::Duration::seconds(5)),
        ];
        let track = context.enrich(&raw).unwrap();
        assert!(track.points.iter().all(|p| p.area.as_deref() == Some("Dongcheng")));
        assert!(track.points.iter().all(|p| p.has_transformed()));
    }

    #[test]
    fn test_without_region_data() {
        let mut config = EnrichConfig::default();
        config.executor.concurrency = 1;
        config.enrich.resolve_regions = false;
        let context = EnrichContext::new(config).unwrap();

        assert!(!context.has_region_data());
        assert!(matches!(context.resolver(), Err(EnrichError::Config { .. })));

        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let track = context.enrich(&[RawPoint::new(116.5, 39.5).with_time(t0)]).unwrap();
        assert!(track.points[0].has_transformed());
    }

    #[test]
    fn test_regions_disabled_never_loads_region_data() {
        let dir = tempfile::tempdir().unwrap();
        write_fixtures(dir.path());
        let mut config = config_for(dir.path());
        config.area_info.boundary_dir = Some(dir.path().join("missing"));
        config.enrich.resolve_regions = false;
        let context = EnrichContext::new(config).unwrap();

        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let track = context.enrich(&[RawPoint::new(116.5, 39.5).with_time(t0)]).unwrap();
        assert!(track.points[0].has_transformed());
        assert!(track.points[0].area.is_none());
        assert!(track.task.is_complete());
        assert!(context.layers.get().is_none());
        assert!(context.index.get().is_none());
    }

    #[test]
    fn test_with_config_rejects_invalid_settings() {
        let dir = tempfile::tempdir().unwrap();
        write_fixtures(dir.path());
        let context = EnrichContext::new(config_for(dir.path())).unwrap();

        let mut config = config_for(dir.path());
        config.executor.concurrency = 0;
        assert!(matches!(context.with_config(config), Err(EnrichError::Config { .. })));
    }

    #[test]
    fn test_with_config_resizes_pool_and_reloads_changed_parts() {
        let dir = tempfile::tempdir().unwrap();
        write_fixtures(dir.path());
        let context = EnrichContext::new(config_for(dir.path())).unwrap();
        context.preload().unwrap();
        let layers = Arc::clone(context.layers().unwrap());

        let mut config = config_for(dir.path());
        config.executor.concurrency = 5;
        config.area_info.cache_capacity = 2;
        let context = context.with_config(config).unwrap();

        assert_eq!(context.executor().concurrency(), 5);
        assert_eq!(context.config().executor.concurrency, 5);
        // Boundary settings unchanged: layers kept. Cache size changed: index reopened.
        assert!(Arc::ptr_eq(context.layers().unwrap(), &layers));
        assert!(context.index.get().is_none());
        let names = context.resolver().unwrap().resolve(116.5, 39.5).unwrap();
        assert_eq!(names.area, "Dongcheng");
    }

    #[test]
    fn test_bad_boundary_dir_surfaces_on_preload() {
        let dir = tempfile::tempdir().unwrap();
        write_fixtures(dir.path());
        let mut config = config_for(dir.path());
        config.area_info.boundary_dir = Some(dir.path().join("missing"));
        let context = EnrichContext::new(config).unwrap();

        assert!(matches!(context.preload(), Err(EnrichError::BoundaryLoad { .. })));
        assert!(!context.is_loaded());
    }

    #[test]
    fn test_with_parts() {
        let dir = tempfile::tempdir().unwrap();
        write_fixtures(dir.path());
        let layers = Arc::new(
            BoundaryLayers::load_dir(dir.path().join("boundaries"), SpatialIndexKind::Linear).unwrap(),
        );
        let index = Arc::new(
            RegionCodeIndex::open(dir.path().join("area.sqlite"), &Default::default(), 4).unwrap(),
        );
        let executor = Arc::new(ParallelExecutor::new(3).unwrap());
        let context = EnrichContext::with_parts(layers, index, executor);

        assert!(context.is_loaded());
        assert_eq!(context.config().executor.concurrency, 3);
        assert_eq!(context.resolver().unwrap().locate(116.5, 39.5), Some("110101"));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = EnrichConfig::default();
        config.pool.max_connections = 0;
        assert!(EnrichContext::new(config).is_err());
    }
}
