//! Storage backends behind one [`VectorBackend`] trait.
//!
//! | Backend | Distance kernel | Quantized scan | Persistence |
//! |---------|-----------------|----------------|-------------|
//! | [`NativeBackend`] | widest SIMD kernel the CPU offers | yes | `bincode` graph snapshot |
//! | [`PortableBackend`] | scalar loop | no | SQLite tables, async load |
//!
//! Which one an instance gets is decided once, by [`open_backend`]: an explicit
//! [`BackendChoice`] wins, `Auto` asks the injected [`NativeFactory`] and falls back to
//! portable only when the native side reports a missing capability. Both keep metadata
//! in a `<path>.meta` sidecar.

pub mod metadata;
pub mod native;
pub mod portable;
pub(crate) mod shared;

pub use metadata::MetadataStore;
pub use native::NativeBackend;
pub use portable::PortableBackend;

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

use crate::config::{IndexConfig, QuantizationConfig};
use crate::error::{InitializationError, Result};
use crate::quantization::{QuantizerStats, TrainContext};
use crate::simd::Kernel;
use crate::types::{Metric, SearchOptions, SearchResult, VectorRecord};

/// The backend an instance actually runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Native,
    Portable,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Portable => "portable",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the caller asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendChoice {
    #[default]
    Auto,
    Native,
    Portable,
}

impl std::str::FromStr for BackendChoice {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "native" => Ok(Self::Native),
            "portable" => Ok(Self::Portable),
            other => Err(format!("unknown backend: {other}")),
        }
    }
}

/// What to do when an explicitly requested native backend cannot start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationPolicy {
    /// Return the [`InitializationError`].
    #[default]
    FailFast,
    /// Use the portable backend on a missing capability. Invalid configuration
    /// still fails.
    FallbackToPortable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendStats {
    pub backend: BackendKind,
    pub count: usize,
    pub dimension: usize,
    pub metric: Metric,
    /// Approximate bytes held by the graph and metadata.
    pub memory_usage: usize,
}

/// Result of [`VectorBackend::train_quantizer`]. Training problems are reported,
/// never raised.
#[derive(Debug, Clone, PartialEq)]
pub enum TrainOutcome {
    Trained(QuantizerStats),
    Skipped(String),
}

pub trait VectorBackend: Send + Sync + std::fmt::Debug {
    fn kind(&self) -> BackendKind;

    /// Create an empty index. Calling it again discards the current contents.
    fn initialize(&mut self, config: &IndexConfig) -> Result<()>;

    fn is_initialized(&self) -> bool;

    /// Insert or overwrite one record.
    fn insert(&mut self, record: VectorRecord) -> Result<()>;

    /// All-or-nothing: every record is validated before any is written.
    fn insert_batch(&mut self, records: Vec<VectorRecord>) -> Result<()>;

    fn search(&self, query: &[f32], k: usize, options: &SearchOptions) -> Result<Vec<SearchResult>>;

    fn remove(&mut self, id: &str) -> Result<bool>;

    fn get_vector(&self, id: &str) -> Result<Option<VectorRecord>>;

    fn stats(&self) -> Result<BackendStats>;

    /// Write the index to `path` and metadata to `<path>.meta`.
    fn save(&self, path: &Path) -> Result<()>;

    /// Replace the current contents with what `save` wrote to `path`.
    fn load(&mut self, path: &Path) -> Result<()>;

    fn close(&mut self) -> Result<()>;

    fn train_quantizer(&mut self, config: &QuantizationConfig, ctx: &TrainContext) -> TrainOutcome {
        let _ = (config, ctx);
        TrainOutcome::Skipped(format!("{} backend does not quantize", self.kind()))
    }

    fn quantizer_stats(&self) -> Option<QuantizerStats> {
        None
    }
}

// ── Selection ──────────────────────────────────────────────────────────────

/// Builds native backends. Injected so tests and embedders can control what
/// "native available" means; nothing is cached between calls.
pub trait NativeFactory: Send + Sync {
    /// Check whether a native backend could run here with this configuration.
    fn probe(&self, config: &IndexConfig, path: &Path) -> std::result::Result<(), InitializationError>;

    /// Build and initialize a native backend.
    fn create(
        &self,
        config: &IndexConfig,
        path: &Path,
    ) -> std::result::Result<Box<dyn VectorBackend>, InitializationError>;
}

/// Native backend on the CPU's SIMD kernel. Reports a missing capability when
/// only the scalar kernel is available.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimdNativeFactory;

impl NativeFactory for SimdNativeFactory {
    fn probe(&self, config: &IndexConfig, path: &Path) -> std::result::Result<(), InitializationError> {
        config.validate()?;
        check_storage_path(path)?;
        let kernel = Kernel::detect();
        if kernel.lanes() <= 1 {
            return Err(InitializationError::MissingCapability(
                "no SIMD instruction set (AVX2+FMA or NEON) detected".into(),
            ));
        }
        Ok(())
    }

    fn create(
        &self,
        config: &IndexConfig,
        path: &Path,
    ) -> std::result::Result<Box<dyn VectorBackend>, InitializationError> {
        self.probe(config, path)?;
        let mut backend = NativeBackend::new(Kernel::detect());
        backend
            .initialize(config)
            .map_err(|e| InitializationError::InvalidConfiguration(e.to_string()))?;
        Ok(Box::new(backend))
    }
}

/// A storage path must not be a directory and its parent must not be a file.
pub fn check_storage_path(path: &Path) -> std::result::Result<(), InitializationError> {
    if path.as_os_str().is_empty() {
        return Err(InitializationError::InvalidConfiguration(
            "storage path is empty".into(),
        ));
    }
    if path.is_dir() {
        return Err(InitializationError::InvalidConfiguration(format!(
            "storage path {} is a directory",
            path.display()
        )));
    }
    if let Some(parent) = path.parent() {
        if parent.exists() && !parent.is_dir() {
            return Err(InitializationError::InvalidConfiguration(format!(
                "parent of storage path {} is not a directory",
                path.display()
            )));
        }
    }
    Ok(())
}

fn portable(config: &IndexConfig, path: &Path) -> Result<Box<dyn VectorBackend>> {
    config.validate()?;
    check_storage_path(path)?;
    let mut backend = PortableBackend::new();
    backend.initialize(config)?;
    Ok(Box::new(backend))
}

/// Resolve `choice` to an initialized backend.
pub fn open_backend(
    choice: BackendChoice,
    policy: DegradationPolicy,
    config: &IndexConfig,
    path: &Path,
    factory: &dyn NativeFactory,
) -> Result<Box<dyn VectorBackend>> {
    match choice {
        BackendChoice::Portable => portable(config, path),
        BackendChoice::Auto => match factory.create(config, path) {
            Ok(backend) => Ok(backend),
            Err(InitializationError::MissingCapability(reason)) => {
                info!(%reason, "native backend unavailable, using portable");
                portable(config, path)
            }
            Err(e) => Err(e.into()),
        },
        BackendChoice::Native => match factory.create(config, path) {
            Ok(backend) => Ok(backend),
            Err(InitializationError::MissingCapability(reason))
                if policy == DegradationPolicy::FallbackToPortable =>
            {
                warn!(%reason, "native backend requested but unavailable, degrading to portable");
                portable(config, path)
            }
            Err(e) => Err(e.into()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VectorError;

    struct NoNative;

    impl NativeFactory for NoNative {
        fn probe(&self, _: &IndexConfig, _: &Path) -> std::result::Result<(), InitializationError> {
            Err(InitializationError::MissingCapability("test".into()))
        }

        fn create(
            &self,
            config: &IndexConfig,
            path: &Path,
        ) -> std::result::Result<Box<dyn VectorBackend>, InitializationError> {
            self.probe(config, path)?;
            unreachable!()
        }
    }

    struct AlwaysNative;

    impl NativeFactory for AlwaysNative {
        fn probe(&self, config: &IndexConfig, path: &Path) -> std::result::Result<(), InitializationError> {
            config.validate()?;
            check_storage_path(path)
        }

        fn create(
            &self,
            config: &IndexConfig,
            path: &Path,
        ) -> std::result::Result<Box<dyn VectorBackend>, InitializationError> {
            self.probe(config, path)?;
            let mut b = NativeBackend::new(Kernel::scalar());
            b.initialize(config).unwrap();
            Ok(Box::new(b))
        }
    }

    fn path() -> std::path::PathBuf {
        std::env::temp_dir().join("agentdb-select-test").join("index.db")
    }

    #[test]
    fn explicit_portable_wins() {
        let b = open_backend(
            BackendChoice::Portable,
            DegradationPolicy::FailFast,
            &IndexConfig::with_dimension(4),
            &path(),
            &AlwaysNative,
        )
        .unwrap();
        assert_eq!(b.kind(), BackendKind::Portable);
    }

    #[test]
    fn auto_prefers_native_and_degrades_on_missing_capability() {
        let config = IndexConfig::with_dimension(4);
        let b = open_backend(BackendChoice::Auto, DegradationPolicy::FailFast, &config, &path(), &AlwaysNative).unwrap();
        assert_eq!(b.kind(), BackendKind::Native);
        let b = open_backend(BackendChoice::Auto, DegradationPolicy::FailFast, &config, &path(), &NoNative).unwrap();
        assert_eq!(b.kind(), BackendKind::Portable);
    }

    #[test]
    fn explicit_native_fails_fast_unless_fallback_allowed() {
        let config = IndexConfig::with_dimension(4);
        let err = open_backend(BackendChoice::Native, DegradationPolicy::FailFast, &config, &path(), &NoNative)
            .unwrap_err();
        assert!(matches!(
            err,
            VectorError::Initialization(InitializationError::MissingCapability(_))
        ));

        let b = open_backend(
            BackendChoice::Native,
            DegradationPolicy::FallbackToPortable,
            &config,
            &path(),
            &NoNative,
        )
        .unwrap();
        assert_eq!(b.kind(), BackendKind::Portable);
    }

    #[test]
    fn invalid_configuration_never_degrades() {
        let config = IndexConfig::with_dimension(0);
        for choice in [BackendChoice::Auto, BackendChoice::Native] {
            let err = open_backend(
                choice,
                DegradationPolicy::FallbackToPortable,
                &config,
                &path(),
                &AlwaysNative,
            )
            .unwrap_err();
            assert!(matches!(
                err,
                VectorError::Initialization(InitializationError::InvalidConfiguration(_))
            ));
        }

        let dir = tempfile::tempdir().unwrap();
        let err = open_backend(
            BackendChoice::Native,
            DegradationPolicy::FallbackToPortable,
            &IndexConfig::with_dimension(4),
            dir.path(),
            &AlwaysNative,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            VectorError::Initialization(InitializationError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn backend_choice_parses() {
        assert_eq!("Portable".parse::<BackendChoice>().unwrap(), BackendChoice::Portable);
        assert!("gpu".parse::<BackendChoice>().is_err());
    }
}
