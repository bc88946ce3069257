//! Attention-based re-ranking of search results.
//!
//! Two interchangeable [`AttentionBackend`]s compute the same thing:
//!
//! | Backend | Working memory | Notes |
//! |---------|----------------|-------|
//! | [`FlashAttention`] | `block_size²` scores | online softmax across key blocks |
//! | [`NaiveAttention`] | `queries × keys` scores | explicit score matrix; reference path |
//!
//! Both add the hierarchy bias from [`hyperbolic`] to the logits. The [`Enhancer`]
//! uses the query's attention over the result vectors to re-order results; any
//! failure leaves the caller with the original ordering.

pub mod flash;
pub mod hyperbolic;
pub mod naive;

pub use flash::FlashAttention;
pub use naive::NaiveAttention;

use ndarray::{Array1, Array2};
use std::time::Duration;

use crate::config::AttentionConfig;
use crate::error::{Result, VectorError};
use crate::types::SearchResult;

#[derive(Debug, Clone)]
pub struct AttentionInput {
    /// `n_queries × d`
    pub queries: Array2<f32>,
    /// `n_keys × d`
    pub keys: Array2<f32>,
    /// `n_keys × d_v`
    pub values: Array2<f32>,
    /// Hierarchy level per key; empty means all level 0.
    pub levels: Vec<f32>,
    pub decay: f32,
}

impl AttentionInput {
    /// Build from row-major flat buffers.
    pub fn from_flat(
        queries: &[f32],
        keys: &[f32],
        values: &[f32],
        dim: usize,
        value_dim: usize,
    ) -> Result<Self> {
        let shape = |data: &[f32], width: usize, what: &str| -> Result<Array2<f32>> {
            if width == 0 || data.len() % width != 0 {
                return Err(VectorError::Attention(format!(
                    "{what} buffer of {} floats is not a multiple of {width}",
                    data.len()
                )));
            }
            Array2::from_shape_vec((data.len() / width, width), data.to_vec())
                .map_err(|e| VectorError::Attention(e.to_string()))
        };
        Self::new(
            shape(queries, dim, "query")?,
            shape(keys, dim, "key")?,
            shape(values, value_dim, "value")?,
        )
    }

    pub fn new(queries: Array2<f32>, keys: Array2<f32>, values: Array2<f32>) -> Result<Self> {
        if queries.ncols() != keys.ncols() {
            return Err(VectorError::Attention(format!(
                "query width {} differs from key width {}",
                queries.ncols(),
                keys.ncols()
            )));
        }
        if keys.nrows() != values.nrows() {
            return Err(VectorError::Attention(format!(
                "{} keys but {} values",
                keys.nrows(),
                values.nrows()
            )));
        }
        Ok(Self {
            queries,
            keys,
            values,
            levels: Vec::new(),
            decay: 0.0,
        })
    }

    pub fn with_levels(mut self, levels: Vec<f32>, decay: f32) -> Self {
        self.levels = levels;
        self.decay = decay;
        self
    }

    pub(crate) fn scale(&self) -> f32 {
        1.0 / (self.keys.ncols().max(1) as f32).sqrt()
    }

    /// Logit bias per key.
    pub(crate) fn bias(&self) -> Result<Array1<f32>> {
        if self.levels.is_empty() {
            return Ok(Array1::zeros(self.keys.nrows()));
        }
        if self.levels.len() != self.keys.nrows() {
            return Err(VectorError::Attention(format!(
                "{} hierarchy levels for {} keys",
                self.levels.len(),
                self.keys.nrows()
            )));
        }
        Ok(hyperbolic::level_bias(&self.levels, self.decay))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttentionMetrics {
    pub backend: &'static str,
    pub blocks: usize,
    /// Largest score buffer held at once, in elements.
    pub peak_scratch: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct AttentionOutput {
    /// `n_queries × d_v`
    pub output: Array2<f32>,
    /// `n_queries × n_keys`; each row sums to 1.
    pub weights: Array2<f32>,
    pub metrics: AttentionMetrics,
}

pub trait AttentionBackend: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    fn attend(&self, input: &AttentionInput) -> Result<AttentionOutput>;
}

/// Block-wise attention when configured, otherwise the explicit score matrix.
pub fn select_backend(config: &AttentionConfig) -> Box<dyn AttentionBackend> {
    if config.flash && config.block_size > 0 {
        Box::new(FlashAttention::new(config.block_size))
    } else {
        Box::new(NaiveAttention)
    }
}

/// Re-orders search results by blending similarity with attention weight.
#[derive(Debug)]
pub struct Enhancer {
    backend: Box<dyn AttentionBackend>,
    decay: f32,
    blend: f32,
}

impl Enhancer {
    pub fn from_config(config: &AttentionConfig) -> Self {
        Self::with_backend(select_backend(config), config)
    }

    pub fn with_backend(backend: Box<dyn AttentionBackend>, config: &AttentionConfig) -> Self {
        Self {
            backend,
            decay: config.decay_factor,
            blend: config.blend.clamp(0.0, 1.0),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// `vectors[i]` is the stored embedding of `results[i]`.
    ///
    /// Score is `(1 - blend) * similarity + blend * w / max(w)`, where `w` is the
    /// query's attention weight on the result. Distances and similarities are left
    /// untouched; only the order and `attention_weight` change.
    pub fn rerank(
        &self,
        query: &[f32],
        results: Vec<SearchResult>,
        vectors: &[Vec<f32>],
    ) -> Result<Vec<SearchResult>> {
        if results.is_empty() {
            return Ok(results);
        }
        if vectors.len() != results.len() {
            return Err(VectorError::Attention(format!(
                "{} vectors for {} results",
                vectors.len(),
                results.len()
            )));
        }
        let dim = query.len();
        let flat: Vec<f32> = vectors.iter().flatten().copied().collect();
        let levels: Vec<f32> = results
            .iter()
            .map(|r| hyperbolic::hierarchy_level(r.metadata.as_ref()))
            .collect();
        let input = AttentionInput::from_flat(query, &flat, &flat, dim, dim)?.with_levels(levels, self.decay);

        let out = self.backend.attend(&input)?;
        let weights = out.weights.row(0).to_vec();
        if weights.len() != results.len() || weights.iter().any(|w| !w.is_finite()) {
            return Err(VectorError::Attention(format!(
                "{} returned unusable weights",
                self.backend.name()
            )));
        }
        let max_w = weights.iter().copied().fold(f32::MIN_POSITIVE, f32::max);

        let mut scored: Vec<(f32, SearchResult)> = results
            .into_iter()
            .zip(weights)
            .map(|(mut r, w)| {
                r.attention_weight = Some(w);
                let score = (1.0 - self.blend) * r.similarity + self.blend * (w / max_w);
                (score, r)
            })
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.id.cmp(&b.1.id)));
        tracing::debug!(
            backend = self.backend.name(),
            blocks = out.metrics.blocks,
            elapsed_us = out.metrics.elapsed.as_micros() as u64,
            "results re-ranked"
        );
        Ok(scored.into_iter().map(|(_, r)| r).collect())
    }
}

/// Row-wise max-subtracted softmax in place.
pub(crate) fn softmax_rows(scores: &mut Array2<f32>) {
    for mut row in scores.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |m, &x| m.max(x));
        row.mapv_inplace(|x| (x - max).exp());
        let sum = row.sum();
        if sum > 0.0 {
            row.mapv_inplace(|x| x / sum);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Metric;
    use serde_json::json;

    fn random_input(nq: usize, nk: usize, d: usize, seed: u64) -> AttentionInput {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        let mut sample = |n: usize| (0..n).map(|_| rng.gen_range(-1.0f32..1.0)).collect::<Vec<_>>();
        let (q, k, v) = (sample(nq * d), sample(nk * d), sample(nk * 3));
        let levels = (0..nk).map(|i| (i % 4) as f32).collect();
        AttentionInput::from_flat(&q, &k, &v, d, 3)
            .unwrap()
            .with_levels(levels, 0.4)
    }

    #[test]
    fn flash_and_naive_agree() {
        let input = random_input(7, 45, 12, 3);
        let naive = NaiveAttention.attend(&input).unwrap();
        for block in [1, 4, 16, 64] {
            let flash = FlashAttention::new(block).attend(&input).unwrap();
            for (a, b) in flash.output.iter().zip(naive.output.iter()) {
                assert!((a - b).abs() < 1e-5, "block {block}: {a} vs {b}");
            }
            for (a, b) in flash.weights.iter().zip(naive.weights.iter()) {
                assert!((a - b).abs() < 1e-5, "block {block}: {a} vs {b}");
            }
            assert!(flash.metrics.peak_scratch <= block * block);
        }
    }

    #[test]
    fn mismatched_shapes_are_rejected() {
        assert!(AttentionInput::from_flat(&[1.0; 4], &[1.0; 6], &[1.0; 3], 2, 1).is_err());
        assert!(AttentionInput::from_flat(&[1.0; 3], &[1.0; 4], &[1.0; 2], 2, 1).is_err());
        let input = AttentionInput::from_flat(&[1.0; 2], &[1.0; 4], &[1.0; 2], 2, 1)
            .unwrap()
            .with_levels(vec![1.0], 0.5);
        assert!(NaiveAttention.attend(&input).is_err());
    }

    #[test]
    fn rerank_prefers_shallow_results_when_blended() {
        let config = AttentionConfig {
            blend: 1.0,
            decay_factor: 2.0,
            ..AttentionConfig::default()
        };
        let enhancer = Enhancer::from_config(&config);
        let level = |l: u64| json!({ "hierarchy_level": l }).as_object().cloned().unwrap();
        let mut deep = SearchResult::new("deep", 0.0, Metric::Cosine);
        deep.metadata = Some(level(3));
        let mut shallow = SearchResult::new("shallow", 0.1, Metric::Cosine);
        shallow.metadata = Some(level(0));

        let v = vec![1.0, 0.0];
        let out = enhancer
            .rerank(&v, vec![deep, shallow], &[v.clone(), v.clone()])
            .unwrap();
        assert_eq!(out[0].id, "shallow");
        assert!(out.iter().all(|r| r.attention_weight.is_some()));
        // distances are not rewritten
        assert_eq!(out[0].distance, 0.1);
    }

    #[test]
    fn rerank_without_blend_keeps_similarity_order() {
        let config = AttentionConfig {
            blend: 0.0,
            ..AttentionConfig::default()
        };
        let enhancer = Enhancer::from_config(&config);
        let results = vec![
            SearchResult::new("a", 0.1, Metric::Cosine),
            SearchResult::new("b", 0.2, Metric::Cosine),
        ];
        let vectors = vec![vec![0.0, 1.0], vec![1.0, 0.0]];
        let out = enhancer.rerank(&[1.0, 0.0], results, &vectors).unwrap();
        assert_eq!(out[0].id, "a");
    }
}
