//! Proof-gated vector memory for AI agents.
//!
//! AgentDB stores fixed-dimension `f32` embeddings in an HNSW graph and answers
//! approximate nearest-neighbor queries. Every write is admitted only after its
//! proof checks out against the tip of a hash-chained attestation log, so the log
//! is a complete, tamper-evident history of what changed the index.
//!
//! | Layer | Module | Notes |
//! |-------|--------|-------|
//! | Distance kernels | [`simd`] | AVX2+FMA, NEON, or unrolled scalar |
//! | Compression | [`quantization`] | scalar 4/8-bit, product, binary |
//! | Graph | [`index`] | HNSW with deterministic ties and delete repair |
//! | Storage | [`backend`] | native (SIMD, bincode) or portable (scalar, SQLite) |
//! | Write gate | [`guard`] | keyed BLAKE3 proofs, attestation chain |
//! | Re-ranking | [`attention`] | flash or naive attention with hierarchy decay |
//! | Facade | [`engine`] | [`AgentDb`]: cache, search, mutation, persistence |
//!
//! # Example
//!
//! ```no_run
//! use agentdb::{AgentDb, AgentDbConfig, SearchOptions, VectorRecord};
//!
//! # fn main() -> agentdb::Result<()> {
//! let db = AgentDb::open(AgentDbConfig::at("/tmp/agentdb/index.db", 3))?;
//! db.insert(VectorRecord::new("a", vec![1.0, 0.0, 0.0]))?;
//! let hits = db.search(&[0.9, 0.1, 0.0], 1, &SearchOptions::default())?;
//! assert_eq!(hits[0].id, "a");
//! db.save()?;
//! # Ok(())
//! # }
//! ```

pub mod attention;
pub mod backend;
pub mod cache;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod guard;
pub mod index;
pub mod quantization;
pub mod simd;
pub mod types;

pub use config::AgentDbConfig;
pub use engine::{AgentDb, EngineStats};
pub use error::{InitializationError, Result, VectorError};
pub use guard::{Mutation, MutationProof};
pub use types::{Metadata, Metric, SearchOptions, SearchResult, SearchStrategy, VectorRecord};
