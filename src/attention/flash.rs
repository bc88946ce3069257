//! Block-wise attention with an online softmax.
//!
//! Each query block walks the key blocks once, carrying a running max `m`, running
//! normalizer `l` and an unnormalized accumulator per query row:
//!
//! ```text
//! m' = max(m, max_j s_j)
//! l' = l * exp(m - m') + Σ_j exp(s_j - m')
//! acc' = acc * exp(m - m') + Σ_j exp(s_j - m') * v_j
//! ```
//!
//! Only one `block × block` score tile exists at a time. The final weights are
//! recomputed tile by tile from the settled `m` and `l`.

use ndarray::{s, Array1, Array2, ArrayView2, Axis};
use std::time::Instant;

use super::{AttentionBackend, AttentionInput, AttentionMetrics, AttentionOutput};
use crate::error::{Result, VectorError};

#[derive(Debug, Clone, Copy)]
pub struct FlashAttention {
    block_size: usize,
}

impl FlashAttention {
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size: block_size.max(1),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    fn tile(
        &self,
        input: &AttentionInput,
        queries: &ArrayView2<'_, f32>,
        bias: &Array1<f32>,
        k0: usize,
        k1: usize,
    ) -> Array2<f32> {
        let keys = input.keys.slice(s![k0..k1, ..]);
        let mut tile = queries.dot(&keys.t()) * input.scale();
        tile += &bias.slice(s![k0..k1]).insert_axis(Axis(0));
        tile
    }
}

impl AttentionBackend for FlashAttention {
    fn name(&self) -> &'static str {
        "flash"
    }

    fn attend(&self, input: &AttentionInput) -> Result<AttentionOutput> {
        let start = Instant::now();
        let bias = input.bias()?;
        let (nq, nk, dv) = (input.queries.nrows(), input.keys.nrows(), input.values.ncols());
        if nk == 0 {
            return Err(VectorError::Attention("no keys to attend over".into()));
        }
        let bs = self.block_size;
        let mut output = Array2::<f32>::zeros((nq, dv));
        let mut weights = Array2::<f32>::zeros((nq, nk));
        let mut blocks = 0usize;
        let mut peak_scratch = 0usize;

        for q0 in (0..nq).step_by(bs) {
            let q1 = (q0 + bs).min(nq);
            let queries = input.queries.slice(s![q0..q1, ..]);
            let rows = q1 - q0;
            let mut m = Array1::from_elem(rows, f32::NEG_INFINITY);
            let mut l = Array1::<f32>::zeros(rows);
            let mut acc = Array2::<f32>::zeros((rows, dv));

            for k0 in (0..nk).step_by(bs) {
                let k1 = (k0 + bs).min(nk);
                let tile = self.tile(input, &queries, &bias, k0, k1);
                peak_scratch = peak_scratch.max(tile.len());
                blocks += 1;
                let values = input.values.slice(s![k0..k1, ..]);

                for r in 0..rows {
                    let row = tile.row(r);
                    let tile_max = row.fold(f32::NEG_INFINITY, |a, &b| a.max(b));
                    let next_m = m[r].max(tile_max);
                    let correction = if m[r].is_finite() { (m[r] - next_m).exp() } else { 0.0 };
                    let p = row.mapv(|x| (x - next_m).exp());
                    l[r] = l[r] * correction + p.sum();
                    let mut acc_row = acc.row_mut(r);
                    acc_row *= correction;
                    acc_row += &p.dot(&values);
                    m[r] = next_m;
                }
            }

            for r in 0..rows {
                if l[r] > 0.0 {
                    let normalized = &acc.row(r) / l[r];
                    output.row_mut(q0 + r).assign(&normalized);
                }
            }

            for k0 in (0..nk).step_by(bs) {
                let k1 = (k0 + bs).min(nk);
                let tile = self.tile(input, &queries, &bias, k0, k1);
                for r in 0..rows {
                    let (mr, lr) = (m[r], l[r]);
                    let w = tile.row(r).mapv(|x| if lr > 0.0 { (x - mr).exp() / lr } else { 0.0 });
                    weights.slice_mut(s![q0 + r, k0..k1]).assign(&w);
                }
            }
        }

        Ok(AttentionOutput {
            output,
            weights,
            metrics: AttentionMetrics {
                backend: self.name(),
                blocks,
                peak_scratch,
                elapsed: start.elapsed(),
            },
        })
    }
}
