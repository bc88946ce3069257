//! Reference attention over the full score matrix.
//!
//! Scratch grows with `queries × keys`. Selected when `attention.flash` is off,
//! and used to check [`FlashAttention`](super::flash::FlashAttention).

use ndarray::Axis;
use std::time::Instant;

use super::{softmax_rows, AttentionBackend, AttentionInput, AttentionMetrics, AttentionOutput};
use crate::error::Result;

/// Softmax over the full `queries × keys` score matrix.
#[derive(Debug, Clone, Copy, Default)]
pub struct NaiveAttention;

impl AttentionBackend for NaiveAttention {
    fn name(&self) -> &'static str {
        "naive"
    }

    fn attend(&self, input: &AttentionInput) -> Result<AttentionOutput> {
        let start = Instant::now();
        let bias = input.bias()?;
        let mut scores = input.queries.dot(&input.keys.t()) * input.scale();
        scores += &bias.insert_axis(Axis(0));
        softmax_rows(&mut scores);
        let output = scores.dot(&input.values);
        let peak_scratch = scores.len();
        Ok(AttentionOutput {
            output,
            weights: scores,
            metrics: AttentionMetrics {
                backend: self.name(),
                blocks: 1,
                peak_scratch,
                elapsed: start.elapsed(),
            },
        })
    }
}
