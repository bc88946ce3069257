#![allow(dead_code)]

use agentdb::backend::{BackendChoice, NativeBackend, NativeFactory, VectorBackend};
use agentdb::config::IndexConfig;
use agentdb::simd::Kernel;
use agentdb::{AgentDb, AgentDbConfig, InitializationError};
use rand::{Rng, SeedableRng};
use std::path::Path;

/// Native backend on the scalar kernel, so native code paths run on any machine.
pub struct ScalarNativeFactory;

impl NativeFactory for ScalarNativeFactory {
    fn probe(&self, _config: &IndexConfig, _path: &Path) -> Result<(), InitializationError> {
        Ok(())
    }

    fn create(
        &self,
        config: &IndexConfig,
        _path: &Path,
    ) -> Result<Box<dyn VectorBackend>, InitializationError> {
        let mut backend = NativeBackend::new(Kernel::scalar());
        backend
            .initialize(config)
            .map_err(|e| InitializationError::InvalidConfiguration(e.to_string()))?;
        Ok(Box::new(backend))
    }
}

/// Config for an index at `<dir>/index.db` with a fixed guard key.
pub fn test_config(dir: &Path, dimension: usize, backend: BackendChoice) -> AgentDbConfig {
    let mut config = AgentDbConfig::at(dir.join("index.db"), dimension);
    config.storage.backend = backend;
    config.guard.key = Some("11".repeat(32));
    config
}

pub fn open(config: AgentDbConfig) -> AgentDb {
    AgentDb::open_with(config, &ScalarNativeFactory).unwrap()
}

/// Both backends, for tests that must hold on either.
pub fn backends() -> [BackendChoice; 2] {
    [BackendChoice::Native, BackendChoice::Portable]
}

/// `dim`-dimensional vector with a single spike at `i % dim`.
pub fn spike(dim: usize, i: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; dim];
    v[i % dim] = 1.0;
    v
}

/// `n` random unit vectors, deterministic for a given seed.
pub fn unit_vectors(n: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let v: Vec<f32> = (0..dim).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
            agentdb::simd::normalized(&v)
        })
        .collect()
}

pub fn metadata(value: serde_json::Value) -> agentdb::Metadata {
    value.as_object().cloned().unwrap()
}
