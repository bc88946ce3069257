//! The [`AgentDb`] facade: one storage path, one backend, one guard.
//!
//! Write path: `prove` → [`MutationGuard::apply`] → backend write lock → cache
//! invalidation. Read path: cache → backend search → optional attention re-rank →
//! cache populate. Searches share the backend read lock and run concurrently.
//!
//! Files for a storage path `P`:
//!
//! | File | Contents |
//! |------|----------|
//! | `P` | index snapshot (bincode for native, SQLite for portable) |
//! | `P.meta` | metadata sidecar, JSON |
//! | `P.audit` | attestation journal, SQLite; written on every mutation |

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

use crate::attention::{AttentionBackend, Enhancer};
use crate::backend::{
    open_backend, BackendChoice, BackendKind, BackendStats, NativeFactory, PortableBackend,
    SimdNativeFactory, TrainOutcome, VectorBackend,
};
use crate::cache::{CacheKey, CacheStats, QueryCache};
use crate::config::{sidecar_path, AgentDbConfig};
use crate::error::{Result, VectorError};
use crate::guard::{
    AttestationLog, LogEntry, Mutation, MutationGuard, MutationProof, ProofKey, Rejection,
};
use crate::quantization::{QuantizationStrategy, QuantizerStats, TrainContext};
use crate::types::{SearchOptions, SearchResult, VectorRecord};

#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub backend: BackendStats,
    pub cache: Option<CacheStats>,
    pub quantizer: Option<QuantizerStats>,
    pub log_entries: usize,
    pub log_rejections: usize,
    pub log_tip: String,
    pub attention_backend: &'static str,
}

#[derive(Debug)]
pub struct AgentDb {
    config: AgentDbConfig,
    path: PathBuf,
    backend: RwLock<Box<dyn VectorBackend>>,
    guard: MutationGuard,
    cache: Option<Mutex<QueryCache>>,
    enhancer: Enhancer,
}

impl AgentDb {
    /// Open with the CPU's SIMD capability deciding native availability.
    pub fn open(config: AgentDbConfig) -> Result<Self> {
        Self::open_with(config, &SimdNativeFactory)
    }

    pub fn open_with(config: AgentDbConfig, factory: &dyn NativeFactory) -> Result<Self> {
        config.validate()?;
        let path = config.resolved_path();
        let mut backend = open_backend(
            config.storage.backend,
            config.storage.degradation,
            &config.index,
            &path,
            factory,
        )?;
        if path.exists() {
            backend.load(&path)?;
            info!(path = %path.display(), backend = %backend.kind(), "index loaded");
        }
        Self::assemble(config, path, backend)
    }

    /// Like [`AgentDb::open`], without blocking the runtime. A saved portable index
    /// is read on a blocking task.
    pub async fn open_async(config: AgentDbConfig) -> Result<Self> {
        config.validate()?;
        let path = config.resolved_path();
        if config.storage.backend == BackendChoice::Portable && path.exists() {
            let backend = PortableBackend::load_async(path.clone()).await?;
            let loaded = backend.stats()?.dimension;
            if loaded != config.index.dimension {
                return Err(VectorError::dimension(config.index.dimension, loaded, None));
            }
            return tokio::task::spawn_blocking(move || Self::assemble(config, path, Box::new(backend)))
                .await
                .map_err(|e| VectorError::Io(std::io::Error::other(e)))?;
        }
        tokio::task::spawn_blocking(move || Self::open(config))
            .await
            .map_err(|e| VectorError::Io(std::io::Error::other(e)))?
    }

    fn assemble(config: AgentDbConfig, path: PathBuf, mut backend: Box<dyn VectorBackend>) -> Result<Self> {
        let log = AttestationLog::open(&sidecar_path(&path, "audit"))?;
        let key = match &config.guard.key {
            Some(hex_key) => ProofKey::from_hex(hex_key)?,
            None => {
                debug!("no guard key configured, using a per-process key");
                ProofKey::generate()
            }
        };

        if config.quantization.strategy != QuantizationStrategy::None {
            match backend.train_quantizer(&config.quantization, &TrainContext::new()) {
                TrainOutcome::Trained(stats) => {
                    info!(strategy = %stats.strategy, samples = stats.training_samples, "quantizer ready")
                }
                TrainOutcome::Skipped(reason) => debug!(%reason, "quantizer not trained at open"),
            }
        }

        let cache = config
            .cache
            .enabled
            .then(|| Mutex::new(QueryCache::new(config.cache.capacity)));
        let enhancer = Enhancer::from_config(&config.attention);
        info!(
            path = %path.display(),
            backend = %backend.kind(),
            dimension = config.index.dimension,
            log_entries = log.len(),
            "agentdb open"
        );
        Ok(Self {
            guard: MutationGuard::new(key, log),
            backend: RwLock::new(backend),
            cache,
            enhancer,
            path,
            config,
        })
    }

    /// Replace the attention backend used for re-ranking.
    pub fn with_attention_backend(mut self, backend: Box<dyn AttentionBackend>) -> Self {
        self.enhancer = Enhancer::with_backend(backend, &self.config.attention);
        self
    }

    pub fn config(&self) -> &AgentDbConfig {
        &self.config
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_backend(&self) -> Result<RwLockReadGuard<'_, Box<dyn VectorBackend>>> {
        self.backend.read().map_err(|_| VectorError::LockPoisoned("backend"))
    }

    fn write_backend(&self) -> Result<RwLockWriteGuard<'_, Box<dyn VectorBackend>>> {
        self.backend.write().map_err(|_| VectorError::LockPoisoned("backend"))
    }

    fn lock_cache(&self) -> Option<Result<MutexGuard<'_, QueryCache>>> {
        self.cache
            .as_ref()
            .map(|c| c.lock().map_err(|_| VectorError::LockPoisoned("query cache")))
    }

    fn invalidate_cache(&self) {
        match self.lock_cache() {
            Some(Ok(mut cache)) => cache.invalidate_all(),
            Some(Err(e)) => warn!(error = %e, "could not invalidate query cache"),
            None => {}
        }
    }

    pub fn backend_kind(&self) -> Result<BackendKind> {
        Ok(self.read_backend()?.kind())
    }

    // ── Mutation ────────────────────────────────────────────────────────

    /// Proof for `mutation` against the current log tip.
    pub fn prove(&self, mutation: &Mutation) -> Result<MutationProof> {
        self.guard.prove(mutation)
    }

    /// Apply a proven mutation. Returns `false` only for a remove of an unknown id.
    pub fn apply(&self, mutation: &Mutation, proof: &MutationProof) -> Result<bool> {
        self.guard.apply(mutation, proof, |m| {
            let mut backend = self.write_backend()?;
            let result = match m {
                Mutation::Insert(record) => backend.insert(record.clone()).map(|_| true),
                Mutation::InsertBatch(records) => backend.insert_batch(records.clone()).map(|_| true),
                Mutation::Remove(id) => backend.remove(id),
            };
            self.invalidate_cache();
            result
        })
    }

    fn prove_and_apply(&self, mutation: Mutation) -> Result<bool> {
        let proof = self.prove(&mutation)?;
        self.apply(&mutation, &proof)
    }

    pub fn insert(&self, record: VectorRecord) -> Result<()> {
        self.prove_and_apply(Mutation::Insert(record)).map(|_| ())
    }

    pub fn insert_batch(&self, records: Vec<VectorRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        self.prove_and_apply(Mutation::InsertBatch(records)).map(|_| ())
    }

    pub fn remove(&self, id: &str) -> Result<bool> {
        self.prove_and_apply(Mutation::Remove(id.to_string()))
    }

    // ── Retrieval ───────────────────────────────────────────────────────

    pub fn search(&self, query: &[f32], k: usize, options: &SearchOptions) -> Result<Vec<SearchResult>> {
        let attention = options.attention.unwrap_or(self.config.attention.enabled);
        let key = CacheKey::new(query, k, self.config.index.metric, options, attention);
        if let Some(cache) = self.lock_cache() {
            if let Some(hit) = cache?.get(&key) {
                debug!(key = %key.to_hex(), "query cache hit");
                return Ok(hit);
            }
        }

        // Held through cache population so a concurrent mutation cannot
        // invalidate before stale results land.
        let backend = self.read_backend()?;
        let mut results = backend.search(query, k, options)?;
        if attention && results.len() > 1 {
            results = self.rerank(&**backend, query, results)?;
        }
        if let Some(cache) = self.lock_cache() {
            cache?.insert(key, results.clone());
        }
        Ok(results)
    }

    fn rerank(
        &self,
        backend: &dyn VectorBackend,
        query: &[f32],
        results: Vec<SearchResult>,
    ) -> Result<Vec<SearchResult>> {
        let mut vectors = Vec::with_capacity(results.len());
        for r in &results {
            match backend.get_vector(&r.id)? {
                Some(record) => vectors.push(record.embedding),
                None => {
                    warn!(id = %r.id, "result vector missing, skipping attention");
                    return Ok(results);
                }
            }
        }
        match self.enhancer.rerank(query, results.clone(), &vectors) {
            Ok(reranked) => Ok(reranked),
            Err(e) => {
                warn!(
                    backend = self.enhancer.backend_name(),
                    error = %e,
                    "attention failed, keeping similarity order"
                );
                Ok(results)
            }
        }
    }

    pub fn get(&self, id: &str) -> Result<Option<VectorRecord>> {
        self.read_backend()?.get_vector(id)
    }

    // ── Quantization ────────────────────────────────────────────────────

    /// Retrain the configured quantizer on the current contents.
    pub fn train_quantizer(&self, ctx: &TrainContext) -> Result<TrainOutcome> {
        let mut backend = self.write_backend()?;
        let outcome = backend.train_quantizer(&self.config.quantization, ctx);
        if matches!(outcome, TrainOutcome::Trained(_)) {
            self.invalidate_cache();
        }
        Ok(outcome)
    }

    // ── Audit ───────────────────────────────────────────────────────────

    pub fn log_tip(&self) -> Result<String> {
        self.guard.tip()
    }

    pub fn attestation_entries(&self) -> Result<Vec<LogEntry>> {
        Ok(self.guard.read_log()?.entries().to_vec())
    }

    pub fn rejections(&self) -> Result<Vec<Rejection>> {
        Ok(self.guard.read_log()?.rejections().to_vec())
    }

    pub fn verify_log(&self) -> Result<()> {
        self.guard.read_log()?.verify_chain()
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    pub fn stats(&self) -> Result<EngineStats> {
        let (backend, quantizer) = {
            let b = self.read_backend()?;
            (b.stats()?, b.quantizer_stats())
        };
        let cache = match self.lock_cache() {
            Some(guard) => Some(guard?.stats()),
            None => None,
        };
        let log = self.guard.read_log()?;
        Ok(EngineStats {
            backend,
            cache,
            quantizer,
            log_entries: log.len(),
            log_rejections: log.rejections().len(),
            log_tip: log.tip(),
            attention_backend: self.enhancer.backend_name(),
        })
    }

    /// Write the index and metadata sidecar to the storage path.
    pub fn save(&self) -> Result<()> {
        self.read_backend()?.save(&self.path)?;
        info!(path = %self.path.display(), "index saved");
        Ok(())
    }

    /// Release the index. Later operations fail with `NotInitialized`.
    pub fn close(&self) -> Result<()> {
        self.write_backend()?.close()?;
        self.invalidate_cache();
        Ok(())
    }
}
