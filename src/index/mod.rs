//! Approximate nearest-neighbor index.
//!
//! A single in-memory HNSW graph ([`HnswIndex`]) backs both backends. The backends
//! differ in the distance [`Kernel`](crate::simd::Kernel) they hand it and in how they
//! persist its [`HnswSnapshot`].

pub mod hnsw;

pub use hnsw::{HnswIndex, HnswSnapshot, SnapshotNode};
