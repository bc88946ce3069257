//! Lossy vector compression.
//!
//! Three interchangeable strategies behind the [`Quantizer`] trait:
//!
//! | Strategy | Code | Compression | Distance on codes |
//! |----------|------|-------------|-------------------|
//! | [`ScalarQuantizer`] | 4 or 8 bits per dimension | 8x / 4x | L2 on decoded values |
//! | [`ProductQuantizer`] | one byte per subspace | `4 * D / m` | asymmetric lookup table |
//! | [`BinaryQuantizer`] | one bit per dimension | 32x | Hamming |
//!
//! Codes are derived artifacts. The raw embedding stays authoritative, and every code
//! is regenerated when a quantizer is retrained.

pub mod binary;
pub mod product;
pub mod scalar;

pub use binary::BinaryQuantizer;
pub use product::ProductQuantizer;
pub use scalar::ScalarQuantizer;

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::QuantizationConfig;
use crate::error::{Result, VectorError};

/// Which quantizer a database instance uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantizationStrategy {
    #[default]
    None,
    Scalar,
    Product,
    Binary,
}

impl QuantizationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Scalar => "scalar",
            Self::Product => "product",
            Self::Binary => "binary",
        }
    }
}

impl std::fmt::Display for QuantizationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A compressed vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuantizedCode {
    /// Per-dimension codes; 4-bit codes are packed two per byte, low nibble first.
    Scalar { bits: u8, data: Vec<u8> },
    /// One centroid index per subspace.
    Product(Vec<u8>),
    /// One bit per dimension, little-endian within each word.
    Binary(Vec<u64>),
}

impl QuantizedCode {
    pub fn byte_len(&self) -> usize {
        match self {
            Self::Scalar { data, .. } => data.len(),
            Self::Product(codes) => codes.len(),
            Self::Binary(words) => words.len() * 8,
        }
    }
}

/// Right-hand side of [`Quantizer::distance`].
#[derive(Debug, Clone, Copy)]
pub enum CodeOrVector<'a> {
    Code(&'a QuantizedCode),
    Vector(&'a [f32]),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QuantizerStats {
    pub strategy: String,
    pub trained: bool,
    pub training_samples: usize,
    /// Raw `f32` bytes divided by code bytes.
    pub compression_ratio: f32,
    /// Mean `||v - decode(encode(v))|| / ||v||` over the training sample.
    pub estimated_error_rate: f32,
}

/// Deadline and cancellation flag for long-running training.
///
/// Checked between k-means iterations and between subspaces, so cancellation takes
/// effect within one iteration.
#[derive(Debug, Clone, Default)]
pub struct TrainContext {
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl TrainContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Shared flag; setting it to `true` from any thread cancels training.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn check(&self) -> Result<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(VectorError::TrainingCancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(VectorError::TrainingCancelled);
        }
        Ok(())
    }
}

pub trait Quantizer: Send + Sync + std::fmt::Debug {
    fn strategy(&self) -> QuantizationStrategy;

    fn dimension(&self) -> usize;

    /// Fit codebooks / bounds to `sample`. Fails on too few vectors rather than
    /// producing a degenerate codebook.
    fn train(&mut self, sample: &[Vec<f32>], ctx: &TrainContext) -> Result<()>;

    fn is_trained(&self) -> bool;

    fn encode(&self, vector: &[f32]) -> Result<QuantizedCode>;

    fn decode(&self, code: &QuantizedCode) -> Result<Vec<f32>>;

    /// Approximate distance between a code and another code or a raw vector.
    fn distance(&self, code: &QuantizedCode, other: CodeOrVector<'_>) -> Result<f32>;

    /// Distances from one raw query to many codes. Implementations override this
    /// when per-query work (lookup tables, query binarization) can be shared.
    fn scan(&self, query: &[f32], codes: &[&QuantizedCode]) -> Result<Vec<f32>> {
        codes
            .iter()
            .map(|c| self.distance(c, CodeOrVector::Vector(query)))
            .collect()
    }

    fn stats(&self) -> QuantizerStats;
}

/// Build an untrained quantizer from config. `None` when quantization is disabled.
pub fn create_quantizer(
    config: &QuantizationConfig,
    dimension: usize,
) -> Result<Option<Box<dyn Quantizer>>> {
    let q: Box<dyn Quantizer> = match config.strategy {
        QuantizationStrategy::None => return Ok(None),
        QuantizationStrategy::Scalar => Box::new(ScalarQuantizer::new(dimension, config.bits)?),
        QuantizationStrategy::Product => Box::new(ProductQuantizer::new(
            dimension,
            config.subspaces,
            config.centroids,
            config.iterations,
            config.seed,
        )?),
        QuantizationStrategy::Binary => Box::new(BinaryQuantizer::new(dimension)?),
    };
    Ok(Some(q))
}

/// Reject samples that are too small or have the wrong dimension.
pub(crate) fn check_sample(sample: &[Vec<f32>], dimension: usize, required: usize) -> Result<()> {
    if sample.len() < required {
        return Err(VectorError::InsufficientTrainingData {
            required,
            actual: sample.len(),
        });
    }
    if let Some(bad) = sample.iter().find(|v| v.len() != dimension) {
        return Err(VectorError::dimension(dimension, bad.len(), None));
    }
    Ok(())
}

pub(crate) fn check_vector(vector: &[f32], dimension: usize) -> Result<()> {
    if vector.len() != dimension {
        return Err(VectorError::dimension(dimension, vector.len(), None));
    }
    Ok(())
}

/// Mean relative reconstruction error of `encode`/`decode` over `sample`.
pub(crate) fn reconstruction_error(q: &dyn Quantizer, sample: &[Vec<f32>]) -> Result<f32> {
    let kernel = crate::simd::Kernel::detect();
    let mut total = 0.0f32;
    let mut counted = 0usize;
    for v in sample {
        let norm = kernel.l2_norm(v);
        if norm == 0.0 {
            continue;
        }
        let approx = q.decode(&q.encode(v)?)?;
        total += kernel.euclidean_distance(v, &approx) / norm;
        counted += 1;
    }
    Ok(if counted == 0 { 0.0 } else { total / counted as f32 })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_strategy_builds_nothing() {
        let config = QuantizationConfig::default();
        assert_eq!(config.strategy, QuantizationStrategy::None);
        assert!(create_quantizer(&config, 16).unwrap().is_none());
    }

    #[test]
    fn factory_builds_each_strategy() {
        for strategy in [
            QuantizationStrategy::Scalar,
            QuantizationStrategy::Product,
            QuantizationStrategy::Binary,
        ] {
            let config = QuantizationConfig {
                strategy,
                subspaces: 4,
                centroids: 16,
                ..Default::default()
            };
            let q = create_quantizer(&config, 16).unwrap().unwrap();
            assert_eq!(q.strategy(), strategy);
            assert!(!q.is_trained());
        }
    }

    #[test]
    fn cancelled_context_stops_training() {
        let ctx = TrainContext::new();
        assert!(ctx.check().is_ok());
        ctx.cancel_handle().store(true, Ordering::SeqCst);
        assert!(matches!(ctx.check(), Err(VectorError::TrainingCancelled)));

        let expired = TrainContext::new().with_timeout(Duration::ZERO);
        assert!(matches!(expired.check(), Err(VectorError::TrainingCancelled)));
    }
}
