//! Configuration loading and validation
//!
//! One YAML file describes the erasure geometry, the placement policy, the
//! chunking bounds, the concurrency limits and the backend fleet. Loading
//! validates everything up front so the pipelines never see a half-usable
//! configuration.

use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

use crate::compress::CompressionAlgorithm;
use crate::error::{Error, Result};
use crate::split::SplitBounds;
use crate::stores::{CommandStore, Copier, DirStore, Store};

// =============================================================================
// Schema
// =============================================================================

/// Top-level configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Data shards per chunk
    pub data_shards: usize,
    /// Parity shards per chunk
    pub parity_shards: usize,
    /// Distinct backends each stored shard must reach
    #[serde(default = "default_min_copies")]
    pub min_copies: usize,
    /// Shard compression algorithm
    #[serde(default)]
    pub compression: CompressionAlgorithm,
    /// Chunk size bounds
    #[serde(default)]
    pub chunking: ChunkingConfig,
    /// Pipeline concurrency limits
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    /// Backend fleet
    pub backends: Vec<BackendConfig>,
}

/// Chunk size bounds, in bytes
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChunkingConfig {
    #[serde(default = "default_min_size")]
    pub min_size: u32,
    #[serde(default = "default_avg_size")]
    pub avg_size: u32,
    #[serde(default = "default_max_size")]
    pub max_size: u32,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            min_size: default_min_size(),
            avg_size: default_avg_size(),
            max_size: default_max_size(),
        }
    }
}

/// Pipeline concurrency limits
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConcurrencyConfig {
    /// Chunks admitted into the pipeline at once
    #[serde(default = "default_backlog")]
    pub backlog: usize,
    /// CPU-bound stage workers on the read path
    #[serde(default = "default_pool")]
    pub pool: usize,
    /// Concurrent store transfers
    #[serde(default = "default_store_slots")]
    pub store_slots: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            backlog: default_backlog(),
            pool: default_pool(),
            store_slots: default_store_slots(),
        }
    }
}

/// One storage backend
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    /// Flat directory of blobs named by digest
    Dir {
        id: String,
        path: String,
        /// Capacity in bytes; unbounded when absent
        quota: Option<u64>,
    },
    /// Shell commands with `{hash}` substitution
    Command {
        id: String,
        put: String,
        get: String,
        ls: Option<String>,
        quota: Option<u64>,
    },
}

impl BackendConfig {
    pub fn id(&self) -> &str {
        match self {
            BackendConfig::Dir { id, .. } => id,
            BackendConfig::Command { id, .. } => id,
        }
    }

    pub fn quota(&self) -> Option<u64> {
        match self {
            BackendConfig::Dir { quota, .. } => *quota,
            BackendConfig::Command { quota, .. } => *quota,
        }
    }
}

fn default_min_copies() -> usize {
    2
}
fn default_min_size() -> u32 {
    crate::split::DEFAULT_MIN_SIZE
}
fn default_avg_size() -> u32 {
    crate::split::DEFAULT_AVG_SIZE
}
fn default_max_size() -> u32 {
    crate::split::DEFAULT_MAX_SIZE
}
fn default_backlog() -> usize {
    8
}
fn default_pool() -> usize {
    4
}
fn default_store_slots() -> usize {
    8
}

// =============================================================================
// Loading
// =============================================================================

impl Config {
    /// Parse and validate a YAML configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!("cannot read {}: {}", path.as_ref().display(), e))
        })?;
        Self::parse(&text)
    }

    /// Parse and validate YAML configuration text
    pub fn parse(text: &str) -> Result<Self> {
        let config: Config =
            serde_yaml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.data_shards == 0 {
            return Err(Error::Config("data_shards must be greater than 0".into()));
        }
        if self.parity_shards == 0 {
            return Err(Error::Config("parity_shards must be greater than 0".into()));
        }
        if self.min_copies == 0 {
            return Err(Error::Config("min_copies must be greater than 0".into()));
        }
        if self.backends.is_empty() {
            return Err(Error::Config("at least one backend is required".into()));
        }
        if self.min_copies > self.backends.len() {
            return Err(Error::Config(format!(
                "min_copies {} exceeds backend count {}",
                self.min_copies,
                self.backends.len()
            )));
        }

        let mut ids: Vec<&str> = self.backends.iter().map(|b| b.id()).collect();
        ids.sort_unstable();
        ids.dedup();
        if ids.len() != self.backends.len() {
            return Err(Error::Config("backend ids must be unique".into()));
        }

        self.split_bounds().validate()
    }

    pub fn split_bounds(&self) -> SplitBounds {
        SplitBounds {
            min_size: self.chunking.min_size,
            avg_size: self.chunking.avg_size,
            max_size: self.chunking.max_size,
        }
    }

    /// Total shards per chunk (data + parity)
    pub fn nshards(&self) -> usize {
        self.data_shards + self.parity_shards
    }

    /// Instantiate the backend fleet
    pub fn build_copiers(&self) -> Vec<Copier> {
        self.backends
            .iter()
            .map(|backend| match backend {
                BackendConfig::Dir { id, path, .. } => {
                    Copier::new(id.clone(), Arc::new(DirStore::new(path)) as Arc<dyn Store>)
                }
                BackendConfig::Command {
                    id, put, get, ls, ..
                } => {
                    let mut store = CommandStore::new(put.clone(), get.clone());
                    if let Some(ls) = ls {
                        store = store.with_ls(ls.clone());
                    }
                    Copier::new(id.clone(), Arc::new(store) as Arc<dyn Store>)
                }
            })
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = "
data_shards: 3
parity_shards: 1
backends:
  - kind: dir
    id: local
    path: /tmp/blobs
  - kind: dir
    id: spare
    path: /tmp/spare
";

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config = Config::parse(MINIMAL).unwrap();
        assert_eq!(config.data_shards, 3);
        assert_eq!(config.parity_shards, 1);
        assert_eq!(config.nshards(), 4);
        assert_eq!(config.min_copies, 2);
        assert_eq!(config.compression, CompressionAlgorithm::Lz4);
        assert_eq!(config.concurrency.backlog, 8);
        assert_eq!(config.split_bounds(), SplitBounds::default());
    }

    #[test]
    fn test_full_config() {
        let config = Config::parse(
            "
data_shards: 4
parity_shards: 2
min_copies: 1
compression: none
chunking:
  min_size: 1024
  avg_size: 4096
  max_size: 16384
concurrency:
  backlog: 2
  pool: 2
  store_slots: 3
backends:
  - kind: command
    id: remote
    put: \"cat > /dev/null\"
    get: \"printf x\"
    ls: \"true\"
    quota: 1000000
",
        )
        .unwrap();

        assert_eq!(config.compression, CompressionAlgorithm::None);
        assert_eq!(config.chunking.avg_size, 4096);
        assert_eq!(config.backends[0].id(), "remote");
        assert_eq!(config.backends[0].quota(), Some(1000000));
        assert_eq!(config.build_copiers().len(), 1);
    }

    #[test]
    fn test_rejects_bad_geometry() {
        assert!(Config::parse(&MINIMAL.replace("data_shards: 3", "data_shards: 0")).is_err());
        assert!(Config::parse(&MINIMAL.replace("parity_shards: 1", "parity_shards: 0")).is_err());
    }

    #[test]
    fn test_rejects_min_copies_beyond_fleet() {
        let text = format!("{}min_copies: 3\n", MINIMAL);
        let err = Config::parse(&text).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_rejects_duplicate_backend_ids() {
        let text = MINIMAL.replace("id: spare", "id: local");
        assert!(Config::parse(&text).is_err());
    }

    #[test]
    fn test_rejects_unknown_fields() {
        let text = format!("{}surprise: true\n", MINIMAL);
        assert!(Config::parse(&text).is_err());
    }
}
