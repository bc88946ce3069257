//! Configuration loading from `~/.agentdb/config.toml` and `AGENTDB_*` environment
//! variables.
//!
//! Every section is `#[serde(default)]`, so a config file only needs the keys it
//! changes. Environment overrides are applied after the file is parsed:
//!
//! | Variable | Overrides |
//! |----------|-----------|
//! | `AGENTDB_PATH` | `storage.path` |
//! | `AGENTDB_BACKEND` | `storage.backend` (`auto`, `native`, `portable`) |
//! | `AGENTDB_LOG_LEVEL` | `logging.log_level` |
//! | `AGENTDB_GUARD_KEY` | `guard.key` (64 hex chars) |

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::backend::{BackendChoice, DegradationPolicy};
use crate::error::InitializationError;
use crate::quantization::QuantizationStrategy;
use crate::types::Metric;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AgentDbConfig {
    pub logging: LoggingConfig,
    pub storage: StorageConfig,
    pub index: IndexConfig,
    pub quantization: QuantizationConfig,
    pub attention: AttentionConfig,
    pub cache: CacheConfig,
    pub guard: GuardConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    /// Index file. Metadata and the audit journal live next to it as
    /// `<path>.meta` and `<path>.audit`.
    pub path: String,
    pub backend: BackendChoice,
    pub degradation: DegradationPolicy,
}

/// Index shape and HNSW parameters. Fixed for the lifetime of an instance.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct IndexConfig {
    pub dimension: usize,
    pub metric: Metric,
    /// Max neighbors per node above layer 0; layer 0 allows `2 * m`.
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    pub max_elements: usize,
    /// Seed for level sampling; same seed and insert order give the same graph.
    pub seed: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct QuantizationConfig {
    pub strategy: QuantizationStrategy,
    /// Scalar code width: 4 or 8.
    pub bits: u8,
    /// Product quantization subspaces; must divide `index.dimension`.
    pub subspaces: usize,
    /// Centroids per subspace, at most 256.
    pub centroids: usize,
    pub iterations: usize,
    pub seed: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct AttentionConfig {
    /// Re-rank search results by default. Per-query `SearchOptions::attention`
    /// overrides this.
    pub enabled: bool,
    /// Block-wise attention instead of the explicit score matrix.
    pub flash: bool,
    pub block_size: usize,
    /// Hierarchy decay: each level multiplies a weight by `exp(-decay_factor)`.
    pub decay_factor: f32,
    /// Share of the final score taken from the attention weight.
    pub blend: f32,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub capacity: usize,
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct GuardConfig {
    /// Hex-encoded 32-byte proof key. A random per-process key is used when unset.
    pub key: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let path = default_agentdb_dir()
            .join("index.db")
            .to_string_lossy()
            .into_owned();
        Self {
            path,
            backend: BackendChoice::Auto,
            degradation: DegradationPolicy::FailFast,
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dimension: 384,
            metric: Metric::Cosine,
            m: 16,
            ef_construction: 200,
            ef_search: 100,
            max_elements: 1_000_000,
            seed: 42,
        }
    }
}

impl Default for QuantizationConfig {
    fn default() -> Self {
        Self {
            strategy: QuantizationStrategy::None,
            bits: 8,
            subspaces: 8,
            centroids: 256,
            iterations: 20,
            seed: 42,
        }
    }
}

impl Default for AttentionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            flash: true,
            block_size: 64,
            decay_factor: 0.5,
            blend: 0.3,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 1024,
        }
    }
}

impl IndexConfig {
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> std::result::Result<(), InitializationError> {
        if self.dimension == 0 {
            return Err(InitializationError::InvalidConfiguration(
                "index.dimension must be greater than zero".into(),
            ));
        }
        if self.m < 2 {
            return Err(InitializationError::InvalidConfiguration(format!(
                "index.m must be at least 2, got {}",
                self.m
            )));
        }
        if self.ef_construction == 0 || self.ef_search == 0 {
            return Err(InitializationError::InvalidConfiguration(
                "index.ef_construction and index.ef_search must be positive".into(),
            ));
        }
        if self.max_elements == 0 {
            return Err(InitializationError::InvalidConfiguration(
                "index.max_elements must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl QuantizationConfig {
    pub fn validate(&self, dimension: usize) -> std::result::Result<(), InitializationError> {
        match self.strategy {
            QuantizationStrategy::Scalar if self.bits != 4 && self.bits != 8 => {
                Err(InitializationError::InvalidConfiguration(format!(
                    "quantization.bits must be 4 or 8, got {}",
                    self.bits
                )))
            }
            QuantizationStrategy::Product
                if self.subspaces == 0 || dimension % self.subspaces != 0 =>
            {
                Err(InitializationError::InvalidConfiguration(format!(
                    "quantization.subspaces ({}) must divide index.dimension ({dimension})",
                    self.subspaces
                )))
            }
            QuantizationStrategy::Product if self.centroids == 0 || self.centroids > 256 => {
                Err(InitializationError::InvalidConfiguration(format!(
                    "quantization.centroids must be in 1..=256, got {}",
                    self.centroids
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Returns `~/.agentdb/`, or `./.agentdb/` when no home directory is known.
pub fn default_agentdb_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".agentdb")
}

/// Returns the default config file path: `~/.agentdb/config.toml`
pub fn default_config_path() -> PathBuf {
    default_agentdb_dir().join("config.toml")
}

impl AgentDbConfig {
    /// Config for an instance of the given dimension stored at `path`; everything
    /// else default.
    pub fn at(path: impl AsRef<Path>, dimension: usize) -> Self {
        let mut config = Self::default();
        config.storage.path = path.as_ref().to_string_lossy().into_owned();
        config.index.dimension = dimension;
        config
    }

    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides and validate.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            AgentDbConfig::default()
        };

        config.apply_env_overrides();
        config.validate().context("invalid configuration")?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("AGENTDB_PATH") {
            self.storage.path = val;
        }
        if let Ok(val) = std::env::var("AGENTDB_BACKEND") {
            match val.parse() {
                Ok(choice) => self.storage.backend = choice,
                Err(e) => warn!(value = %val, error = %e, "ignoring AGENTDB_BACKEND"),
            }
        }
        if let Ok(val) = std::env::var("AGENTDB_LOG_LEVEL") {
            self.logging.log_level = val;
        }
        if let Ok(val) = std::env::var("AGENTDB_GUARD_KEY") {
            self.guard.key = Some(val);
        }
    }

    pub fn validate(&self) -> std::result::Result<(), InitializationError> {
        self.index.validate()?;
        self.quantization.validate(self.index.dimension)?;
        if self.cache.enabled && self.cache.capacity == 0 {
            return Err(InitializationError::InvalidConfiguration(
                "cache.capacity must be positive when the cache is enabled".into(),
            ));
        }
        if self.attention.block_size == 0 {
            return Err(InitializationError::InvalidConfiguration(
                "attention.block_size must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.attention.blend) {
            return Err(InitializationError::InvalidConfiguration(format!(
                "attention.blend must be within [0, 1], got {}",
                self.attention.blend
            )));
        }
        if let Some(key) = &self.guard.key {
            if key.len() != 64 || hex::decode(key).is_err() {
                return Err(InitializationError::InvalidConfiguration(
                    "guard.key must be 64 hex characters".into(),
                ));
            }
        }
        Ok(())
    }

    /// Resolve the index path, expanding `~` if needed.
    pub fn resolved_path(&self) -> PathBuf {
        expand_tilde(&self.storage.path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

/// `<path>.<suffix>`, keeping any existing extension.
pub fn sidecar_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AgentDbConfig::default();
        assert_eq!(config.logging.log_level, "info");
        assert_eq!(config.storage.backend, BackendChoice::Auto);
        assert_eq!(config.index.m, 16);
        assert_eq!(config.index.ef_search, 100);
        assert_eq!(config.quantization.strategy, QuantizationStrategy::None);
        assert!(config.storage.path.ends_with("index.db"));
        config.validate().unwrap();
    }

    #[test]
    fn parse_toml_config() {
        let toml_str = r#"
[logging]
log_level = "debug"

[storage]
path = "/tmp/test.db"
backend = "portable"
degradation = "fallback_to_portable"

[index]
dimension = 128
metric = "euclidean"

[quantization]
strategy = "product"
subspaces = 16
"#;
        let config: AgentDbConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.logging.log_level, "debug");
        assert_eq!(config.storage.path, "/tmp/test.db");
        assert_eq!(config.storage.backend, BackendChoice::Portable);
        assert_eq!(
            config.storage.degradation,
            DegradationPolicy::FallbackToPortable
        );
        assert_eq!(config.index.dimension, 128);
        assert_eq!(config.index.metric, Metric::Euclidean);
        assert_eq!(config.quantization.strategy, QuantizationStrategy::Product);
        // defaults still apply for unset fields
        assert_eq!(config.index.ef_construction, 200);
        assert_eq!(config.quantization.centroids, 256);
        config.validate().unwrap();
    }

    #[test]
    fn validation_rejects_bad_shapes() {
        let mut config = AgentDbConfig::default();
        config.index.dimension = 0;
        assert!(config.validate().is_err());

        let mut config = AgentDbConfig::default();
        config.quantization.strategy = QuantizationStrategy::Product;
        config.quantization.subspaces = 7;
        assert!(config.validate().is_err());

        let mut config = AgentDbConfig::default();
        config.quantization.strategy = QuantizationStrategy::Scalar;
        config.quantization.bits = 2;
        assert!(config.validate().is_err());

        let mut config = AgentDbConfig::default();
        config.guard.key = Some("abc".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = AgentDbConfig::default();
        std::env::set_var("AGENTDB_PATH", "/tmp/override.db");
        std::env::set_var("AGENTDB_BACKEND", "native");
        std::env::set_var("AGENTDB_LOG_LEVEL", "trace");

        config.apply_env_overrides();

        assert_eq!(config.storage.path, "/tmp/override.db");
        assert_eq!(config.storage.backend, BackendChoice::Native);
        assert_eq!(config.logging.log_level, "trace");

        // Clean up
        std::env::remove_var("AGENTDB_PATH");
        std::env::remove_var("AGENTDB_BACKEND");
        std::env::remove_var("AGENTDB_LOG_LEVEL");
    }

    #[test]
    fn sidecar_keeps_extension() {
        let p = sidecar_path(Path::new("/tmp/index.db"), "meta");
        assert_eq!(p, PathBuf::from("/tmp/index.db.meta"));
    }
}
