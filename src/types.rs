//! Core record and query types shared by every layer.
//!
//! Defines [`Metric`] (distance semantics and the distance → similarity transform),
//! [`VectorRecord`] (what callers write), and [`SearchResult`] / [`SearchOptions`]
//! (what callers read back).

use serde::{Deserialize, Serialize};

/// Arbitrary per-vector attributes, stored in the metadata sidecar.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Distance metric, fixed per database instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// `1 - cos(a, b)`.
    Cosine,
    /// `||a - b||`.
    Euclidean,
    /// `-dot(a, b)`, so that smaller is closer like the other metrics.
    InnerProduct,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::Euclidean => "euclidean",
            Self::InnerProduct => "inner_product",
        }
    }

    /// Monotonic distance → similarity transform.
    ///
    /// These formulas are part of the public contract: thresholds callers pass to
    /// [`SearchOptions::threshold`] are expressed in this space on every backend.
    pub fn similarity(&self, distance: f32) -> f32 {
        match self {
            Self::Cosine => 1.0 - distance,
            Self::Euclidean => (-distance).exp(),
            Self::InnerProduct => -distance,
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cosine" => Ok(Self::Cosine),
            "euclidean" | "l2" => Ok(Self::Euclidean),
            "inner_product" | "dot" => Ok(Self::InnerProduct),
            _ => Err(format!("unknown metric: {s}")),
        }
    }
}

/// A vector as presented by a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Caller-supplied or generated (UUID v7) identifier. Re-using an id overwrites.
    pub id: String,
    pub embedding: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl VectorRecord {
    pub fn new(id: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            embedding,
            metadata: None,
        }
    }

    /// Record with an engine-generated, time-sortable id.
    pub fn generated(embedding: Vec<f32>) -> Self {
        Self::new(uuid::Uuid::now_v7().to_string(), embedding)
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// A single search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub distance: f32,
    /// Always `metric.similarity(distance)`; never stored independently.
    pub similarity: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    /// Set when the attention pass re-ranked this result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attention_weight: Option<f32>,
}

impl SearchResult {
    pub fn new(id: impl Into<String>, distance: f32, metric: Metric) -> Self {
        Self {
            id: id.into(),
            distance,
            similarity: metric.similarity(distance),
            metadata: None,
            attention_weight: None,
        }
    }
}

/// How the backend finds candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    /// HNSW graph traversal.
    #[default]
    Graph,
    /// Linear scan over quantized codes, then exact re-rank of the best
    /// `k * rerank` candidates. Falls back to the graph without a trained quantizer.
    QuantizedScan { rerank: usize },
}

/// Per-query knobs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Drop results whose similarity is below this value.
    pub threshold: Option<f32>,
    /// Every key must be present in a result's metadata with an equal value.
    pub filter: Option<Metadata>,
    /// Overrides the index's `ef_search` for this query.
    pub ef_search: Option<usize>,
    pub strategy: SearchStrategy,
    /// `None` follows `attention.enabled` from the config.
    pub attention: Option<bool>,
}

impl SearchOptions {
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = Some(threshold);
        self
    }

    pub fn with_filter(mut self, filter: Metadata) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_attention(mut self, enabled: bool) -> Self {
        self.attention = Some(enabled);
        self
    }

    pub fn with_strategy(mut self, strategy: SearchStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub(crate) fn narrows_results(&self) -> bool {
        self.threshold.is_some() || self.filter.as_ref().is_some_and(|f| !f.is_empty())
    }
}
