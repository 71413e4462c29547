//! Layered configuration for the retrieval engine.
//!
//! Defaults are overridden by an optional TOML file and then by environment
//! variables prefixed `INDEXER_` (e.g. `INDEXER_HNSW__M=32`), using the
//! `config` crate's layered-source model.

use crate::error::{IndexerError, Result};
use crate::types::Space;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    pub dimensions: usize,
    pub storage_path: PathBuf,
    pub index_path: PathBuf,
    pub hnsw: HnswConfig,
    pub auto_save: AutoSaveConfig,
    pub cache: CacheConfig,
    pub signature: SignatureConfig,
    pub performance: PerformanceConfig,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            dimensions: 384,
            storage_path: PathBuf::from("./data/metadata.db"),
            index_path: PathBuf::from("./data/index.hnsw"),
            hnsw: HnswConfig::default(),
            auto_save: AutoSaveConfig::default(),
            cache: CacheConfig::default(),
            signature: SignatureConfig::default(),
            performance: PerformanceConfig::default(),
        }
    }
}

impl IndexerConfig {
    /// Load defaults, then an optional TOML file, then `INDEXER_*` env overrides.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let defaults = Self::default();
        let defaults_json = serde_json::to_value(&defaults)
            .map_err(|e| IndexerError::configuration(format!("failed to seed defaults: {e}")))?;

        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&defaults_json).map_err(|e| {
                IndexerError::configuration(format!("failed to load defaults: {e}"))
            })?);

        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("INDEXER")
                .separator("__")
                .try_parsing(true),
        );

        let settled = builder
            .build()
            .map_err(|e| IndexerError::configuration(e.to_string()))?;

        let cfg: Self = settled
            .try_deserialize()
            .map_err(|e| IndexerError::configuration(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.dimensions == 0 {
            return Err(IndexerError::configuration("dimensions must be non-zero"));
        }
        if self.hnsw.m == 0 || self.hnsw.ef_construction == 0 || self.hnsw.ef_search == 0 {
            return Err(IndexerError::configuration(
                "hnsw.m, ef_construction, and ef_search must be non-zero",
            ));
        }
        self.signature.weights.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswConfig {
    pub space: Space,
    pub max_elements: usize,
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            space: Space::Cosine,
            max_elements: 100_000,
            m: 16,
            ef_construction: 200,
            ef_search: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoSaveConfig {
    pub enabled: bool,
    pub interval_seconds: u64,
}

impl Default for AutoSaveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationStrategy {
    Aggressive,
    Conservative,
    Disabled,
}

impl Default for InvalidationStrategy {
    fn default() -> Self {
        Self::Conservative
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub l1: L1Config,
    pub l2: L2Config,
    pub l3: L3Config,
    pub enable_promotion: bool,
    pub enable_warming: bool,
    pub warming_query_count: u32,
    pub invalidation_strategy: InvalidationStrategy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            l1: L1Config::default(),
            l2: L2Config::default(),
            l3: L3Config::default(),
            enable_promotion: true,
            enable_warming: true,
            warming_query_count: 50,
            invalidation_strategy: InvalidationStrategy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct L1Config {
    pub max_entries: u64,
    pub max_bytes: u64,
    pub default_ttl_ms: u64,
}

impl Default for L1Config {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            max_bytes: 64 * 1024 * 1024,
            default_ttl_ms: 5 * 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct L2Config {
    pub path: PathBuf,
    pub max_bytes: u64,
    pub default_ttl_ms: u64,
}

impl Default for L2Config {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/cache/l2"),
            max_bytes: 512 * 1024 * 1024,
            default_ttl_ms: 60 * 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct L3Config {
    pub path: PathBuf,
    pub max_entries: u64,
    pub default_ttl_ms: u64,
}

impl Default for L3Config {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/cache/l3.db"),
            max_entries: 100_000,
            default_ttl_ms: 24 * 60 * 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureWeights {
    pub name: f32,
    pub param: f32,
    pub return_type: f32,
}

impl Default for SignatureWeights {
    fn default() -> Self {
        Self {
            name: 0.6,
            param: 0.25,
            return_type: 0.15,
        }
    }
}

impl SignatureWeights {
    pub fn validate(&self) -> Result<()> {
        let sum = self.name + self.param + self.return_type;
        if (sum - 1.0).abs() > 0.01 {
            return Err(IndexerError::configuration(format!(
                "signature weights must sum to ~1.0, got {sum}"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureConfig {
    pub weights: SignatureWeights,
    pub fuzzy_threshold: f32,
    pub max_edit_distance: u32,
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            weights: SignatureWeights::default(),
            fuzzy_threshold: 0.7,
            max_edit_distance: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_query_time_ms: u64,
    pub max_concurrent_queries: usize,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_query_time_ms: 200,
            max_concurrent_queries: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        IndexerConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_dimensions_rejected() {
        let mut cfg = IndexerConfig::default();
        cfg.dimensions = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn weights_must_sum_to_one() {
        let mut cfg = IndexerConfig::default();
        cfg.signature.weights.name = 10.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_with_no_file_returns_defaults() {
        let cfg = IndexerConfig::load(None).unwrap();
        assert_eq!(cfg.dimensions, 384);
    }
}
