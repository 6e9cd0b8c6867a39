//! # Configuration
//!
//! Typed configuration for the enrichment pipeline, loaded from TOML.
//!
//! ```toml
//! [area_info]
//! boundary_dir = "data/boundaries"
//! code_index_path = "data/area.sqlite"
//!
//! [pool]
//! max_connections = 5
//! blocking = true
//! wait_timeout_ms = 2000
//!
//! [executor]
//! concurrency = 8
//!
//! [coordinate]
//! source = "wgs84"
//! target = "gcj02"
//!
//! [spatial]
//! index = "envelope"
//!
//! [enrich]
//! transform = true
//! resolve_regions = true
//! force = false
//! ```
//!
//! Every section and key is optional. Validation runs as part of loading, so a
//! config that loads is one the pipeline can run with.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::coords::CoordinateSystem;
use crate::enricher::EnrichOptions;
use crate::error::{EnrichError, Result};
use crate::region::SpatialIndexKind;

// ============================================================================
// Sections
// ============================================================================

/// Where boundary layers and the region code index live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AreaInfoConfig {
    /// Directory of `.json`/`.geojson` boundary files
    pub boundary_dir: Option<PathBuf>,
    /// SQLite file with province/city/area tables
    pub code_index_path: Option<PathBuf>,
    /// Entries kept in the code lookup cache. Default: 512
    pub cache_capacity: usize,
}

impl Default for AreaInfoConfig {
    fn default() -> Self {
        Self {
            boundary_dir: None,
            code_index_path: None,
            cache_capacity: 512,
        }
    }
}

/// Code index connection pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Upper bound on concurrently open connections. Default: 5
    pub max_connections: usize,
    /// Wait for a free connection instead of failing. Default: true
    pub blocking: bool,
    /// Give up waiting after this many milliseconds. Default: wait forever
    pub wait_timeout_ms: Option<u64>,
}

impl PoolConfig {
    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            blocking: true,
            wait_timeout_ms: None,
        }
    }
}

/// Worker pool for the per-point pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Worker threads. Default: available parallelism
    pub concurrency: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

/// Native and target coordinate systems.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinateConfig {
    /// System the raw points are recorded in. Default: wgs84
    pub source: CoordinateSystem,
    /// System written to the transformed fields. Default: gcj02
    pub target: CoordinateSystem,
}

impl Default for CoordinateConfig {
    fn default() -> Self {
        Self {
            source: CoordinateSystem::Wgs84,
            target: CoordinateSystem::Gcj02,
        }
    }
}

/// Candidate pre-filter for boundary containment.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpatialConfig {
    pub index: SpatialIndexKind,
}

// ============================================================================
// Top-level Config
// ============================================================================

/// Complete enrichment configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichConfig {
    pub area_info: AreaInfoConfig,
    pub pool: PoolConfig,
    pub executor: ExecutorConfig,
    pub coordinate: CoordinateConfig,
    pub spatial: SpatialConfig,
    pub enrich: EnrichOptions,
}

impl EnrichConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EnrichConfig = toml::from_str(content).map_err(|e| EnrichError::Config {
            key: "toml".to_string(),
            message: e.message().to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| EnrichError::Config {
            key: path.display().to_string(),
            message: format!("cannot read config file: {}", e),
        })?;
        let config = Self::from_toml_str(&content)?;
        log::info!("[Config] Loaded {}", path.display());
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| EnrichError::Serialization {
            message: e.to_string(),
        })
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.pool.max_connections == 0 {
            return Err(invalid("pool.max_connections", "must be at least 1"));
        }
        if self.executor.concurrency == 0 {
            return Err(invalid("executor.concurrency", "must be at least 1"));
        }
        if matches!(&self.area_info.boundary_dir, Some(p) if p.as_os_str().is_empty()) {
            return Err(invalid("area_info.boundary_dir", "must not be empty"));
        }
        if matches!(&self.area_info.code_index_path, Some(p) if p.as_os_str().is_empty()) {
            return Err(invalid("area_info.code_index_path", "must not be empty"));
        }
        Ok(())
    }

    /// Boundary directory, or a config error naming the missing key.
    pub fn boundary_dir(&self) -> Result<&Path> {
        self.area_info
            .boundary_dir
            .as_deref()
            .ok_or_else(|| invalid("area_info.boundary_dir", "required for region resolution"))
    }

    /// Code index path, or a config error naming the missing key.
    pub fn code_index_path(&self) -> Result<&Path> {
        self.area_info
            .code_index_path
            .as_deref()
            .ok_or_else(|| invalid("area_info.code_index_path", "required for region resolution"))
    }
}

fn invalid(key: &str, message: &str) -> EnrichError {
    EnrichError::Config {
        key: key.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EnrichConfig::from_toml_str("").unwrap();
        assert_eq!(config.pool.max_connections, 5);
        assert!(config.pool.blocking);
        assert_eq!(config.pool.wait_timeout(), None);
        assert!(config.executor.concurrency >= 1);
        assert_eq!(config.coordinate.source, CoordinateSystem::Wgs84);
        assert_eq!(config.coordinate.target, CoordinateSystem::Gcj02);
        assert_eq!(config.spatial.index, SpatialIndexKind::Envelope);
        assert!(config.enrich.transform);
        assert!(config.enrich.resolve_regions);
        assert!(!config.enrich.force);
    }

    #[test]
    fn test_full_document() {
        let config = EnrichConfig::from_toml_str(
            r#"
            [area_info]
            boundary_dir = "/data/boundaries"
            code_index_path = "/data/area.sqlite"
            cache_capacity = 64

            [pool]
            max_connections = 2
            blocking = false
            wait_timeout_ms = 250

            [executor]
            concurrency = 3

            [coordinate]
            source = "gcj02"
            target = "bd09"

            [spatial]
            index = "linear"

            [enrich]
            force = true
            "#,
        )
        .unwrap();

        assert_eq!(config.boundary_dir().unwrap(), Path::new("/data/boundaries"));
        assert_eq!(config.area_info.cache_capacity, 64);
        assert_eq!(config.pool.max_connections, 2);
        assert!(!config.pool.blocking);
        assert_eq!(config.pool.wait_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.executor.concurrency, 3);
        assert_eq!(config.coordinate.target, CoordinateSystem::Bd09);
        assert_eq!(config.spatial.index, SpatialIndexKind::Linear);
        assert!(config.enrich.force);
        assert!(config.enrich.transform);
    }

    #[test]
    fn test_validation_rejects_zero_sizes() {
        let err = EnrichConfig::from_toml_str("[pool]\nmax_connections = 0").unwrap_err();
        assert!(matches!(err, EnrichError::Config { ref key, .. } if key == "pool.max_connections"));

        let err = EnrichConfig::from_toml_str("[executor]\nconcurrency = 0").unwrap_err();
        assert!(matches!(err, EnrichError::Config { ref key, .. } if key == "executor.concurrency"));
    }

    #[test]
    fn test_validation_rejects_empty_paths() {
        let err = EnrichConfig::from_toml_str("[area_info]\nboundary_dir = \"\"").unwrap_err();
        assert!(matches!(err, EnrichError::Config { ref key, .. } if key == "area_info.boundary_dir"));
    }

    #[test]
    fn test_unknown_coordinate_system_rejected() {
        let err = EnrichConfig::from_toml_str("[coordinate]\nsource = \"utm\"").unwrap_err();
        assert!(matches!(err, EnrichError::Config { .. }));
    }

    #[test]
    fn test_missing_paths_reported_on_use() {
        let config = EnrichConfig::default();
        assert!(matches!(
            config.code_index_path(),
            Err(EnrichError::Config { ref key, .. }) if key == "area_info.code_index_path"
        ));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("enrich.toml");

        let mut config = EnrichConfig::default();
        config.executor.concurrency = 2;
        config.area_info.boundary_dir = Some(PathBuf::from("/tmp/boundaries"));
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        assert_eq!(EnrichConfig::from_file(&path).unwrap(), config);
    }
}
