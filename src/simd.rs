//! Vectorized distance primitives.
//!
//! [`Kernel::detect`] picks the widest lane width the CPU offers at runtime:
//!
//! | ISA | Lanes | Notes |
//! |-----|-------|-------|
//! | AVX2 + FMA (x86_64) | 8 | fused multiply-add |
//! | NEON (aarch64) | 4 | always present on aarch64 |
//! | scalar | 1 | 8-way unrolled loop, any target |
//!
//! Results agree with a naive loop up to accumulated rounding error; the unrolling
//! and lane width only change summation order.

use crate::types::Metric;

#[allow(dead_code)] // each target only constructs its own SIMD variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Isa {
    Scalar,
    Avx2,
    Neon,
}

/// Handle to a distance implementation.
///
/// Only constructible through [`Kernel::detect`] or [`Kernel::scalar`], so a SIMD
/// variant always corresponds to a feature the running CPU actually has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Kernel {
    isa: Isa,
}

impl Kernel {
    /// Widest kernel supported by this CPU.
    pub fn detect() -> Self {
        #[cfg(target_arch = "x86_64")]
        {
            if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
                return Self { isa: Isa::Avx2 };
            }
        }

        #[cfg(target_arch = "aarch64")]
        {
            if std::arch::is_aarch64_feature_detected!("neon") {
                return Self { isa: Isa::Neon };
            }
        }

        Self::scalar()
    }

    /// Portable kernel, used by the portable backend regardless of CPU.
    pub fn scalar() -> Self {
        Self { isa: Isa::Scalar }
    }

    pub fn lanes(&self) -> usize {
        match self.isa {
            Isa::Scalar => 1,
            Isa::Avx2 => 8,
            Isa::Neon => 4,
        }
    }

    pub fn name(&self) -> &'static str {
        match self.isa {
            Isa::Scalar => "scalar",
            Isa::Avx2 => "avx2+fma",
            Isa::Neon => "neon",
        }
    }

    pub fn is_vectorized(&self) -> bool {
        self.isa != Isa::Scalar
    }

    #[inline]
    pub fn dot(&self, a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len());
        match self.isa {
            #[cfg(target_arch = "x86_64")]
            Isa::Avx2 => unsafe { avx2::dot(a, b) },
            #[cfg(target_arch = "aarch64")]
            Isa::Neon => unsafe { neon::dot(a, b) },
            _ => scalar::dot(a, b),
        }
    }

    #[inline]
    pub fn euclidean_distance_squared(&self, a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len());
        match self.isa {
            #[cfg(target_arch = "x86_64")]
            Isa::Avx2 => unsafe { avx2::l2_squared(a, b) },
            #[cfg(target_arch = "aarch64")]
            Isa::Neon => unsafe { neon::l2_squared(a, b) },
            _ => scalar::l2_squared(a, b),
        }
    }

    #[inline]
    pub fn euclidean_distance(&self, a: &[f32], b: &[f32]) -> f32 {
        self.euclidean_distance_squared(a, b).sqrt()
    }

    #[inline]
    pub fn l2_norm(&self, v: &[f32]) -> f32 {
        self.dot(v, v).sqrt()
    }

    /// Cosine similarity; 0.0 when either vector has zero norm.
    #[inline]
    pub fn cosine_similarity(&self, a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len());
        let (dot, na, nb) = match self.isa {
            #[cfg(target_arch = "x86_64")]
            Isa::Avx2 => unsafe { avx2::dot_and_norms(a, b) },
            #[cfg(target_arch = "aarch64")]
            Isa::Neon => unsafe { neon::dot_and_norms(a, b) },
            _ => scalar::dot_and_norms(a, b),
        };
        cosine_from_parts(dot, na, nb)
    }

    /// Distance under `metric`; smaller is always closer.
    #[inline]
    pub fn distance(&self, metric: Metric, a: &[f32], b: &[f32]) -> f32 {
        match metric {
            Metric::Cosine => 1.0 - self.cosine_similarity(a, b),
            Metric::Euclidean => self.euclidean_distance(a, b),
            Metric::InnerProduct => -self.dot(a, b),
        }
    }

    /// `dot(query, row)` for every row of a row-major `candidates` matrix.
    pub fn batch_dot(&self, query: &[f32], candidates: &[f32]) -> Vec<f32> {
        rows(query, candidates).map(|row| self.dot(query, row)).collect()
    }

    /// Cosine similarity of `query` against every row; the query norm is computed once.
    pub fn batch_cosine_similarity(&self, query: &[f32], candidates: &[f32]) -> Vec<f32> {
        let query_norm_sq = self.dot(query, query);
        rows(query, candidates)
            .map(|row| cosine_from_parts(self.dot(query, row), query_norm_sq, self.dot(row, row)))
            .collect()
    }

    pub fn batch_euclidean_distance(&self, query: &[f32], candidates: &[f32]) -> Vec<f32> {
        rows(query, candidates)
            .map(|row| self.euclidean_distance(query, row))
            .collect()
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::detect()
    }
}

fn rows<'a>(query: &[f32], candidates: &'a [f32]) -> std::slice::ChunksExact<'a, f32> {
    debug_assert!(!query.is_empty());
    debug_assert_eq!(candidates.len() % query.len().max(1), 0);
    candidates.chunks_exact(query.len().max(1))
}

#[inline]
fn cosine_from_parts(dot: f32, norm_a_sq: f32, norm_b_sq: f32) -> f32 {
    if norm_a_sq == 0.0 || norm_b_sq == 0.0 {
        return 0.0;
    }
    dot / (norm_a_sq.sqrt() * norm_b_sq.sqrt())
}

// ── Free functions on the detected kernel ─────────────────────────────────────

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    Kernel::detect().dot(a, b)
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    Kernel::detect().cosine_similarity(a, b)
}

pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    Kernel::detect().euclidean_distance(a, b)
}

pub fn euclidean_distance_squared(a: &[f32], b: &[f32]) -> f32 {
    Kernel::detect().euclidean_distance_squared(a, b)
}

pub fn l2_norm(v: &[f32]) -> f32 {
    Kernel::detect().l2_norm(v)
}

/// Scale `v` to unit length in place. Zero vectors are left untouched.
pub fn normalize(v: &mut [f32]) {
    let n = l2_norm(v);
    if n > 0.0 {
        let inv = 1.0 / n;
        v.iter_mut().for_each(|x| *x *= inv);
    }
}

/// Unit-length copy of `v`.
pub fn normalized(v: &[f32]) -> Vec<f32> {
    let mut out = v.to_vec();
    normalize(&mut out);
    out
}

pub fn batch_dot(query: &[f32], candidates: &[f32]) -> Vec<f32> {
    Kernel::detect().batch_dot(query, candidates)
}

pub fn batch_cosine_similarity(query: &[f32], candidates: &[f32]) -> Vec<f32> {
    Kernel::detect().batch_cosine_similarity(query, candidates)
}

pub fn batch_euclidean_distance(query: &[f32], candidates: &[f32]) -> Vec<f32> {
    Kernel::detect().batch_euclidean_distance(query, candidates)
}

// ── Scalar (8-way unrolled) ───────────────────────────────────────────────────

mod scalar {
    const UNROLL: usize = 8;

    #[inline]
    pub fn dot(a: &[f32], b: &[f32]) -> f32 {
        let mut acc = [0.0f32; UNROLL];
        let (ca, cb) = (a.chunks_exact(UNROLL), b.chunks_exact(UNROLL));
        let tail: f32 = ca
            .remainder()
            .iter()
            .zip(cb.remainder())
            .map(|(x, y)| x * y)
            .sum();
        for (x, y) in ca.zip(cb) {
            for lane in 0..UNROLL {
                acc[lane] += x[lane] * y[lane];
            }
        }
        acc.iter().sum::<f32>() + tail
    }

    #[inline]
    pub fn l2_squared(a: &[f32], b: &[f32]) -> f32 {
        let mut acc = [0.0f32; UNROLL];
        let (ca, cb) = (a.chunks_exact(UNROLL), b.chunks_exact(UNROLL));
        let tail: f32 = ca
            .remainder()
            .iter()
            .zip(cb.remainder())
            .map(|(x, y)| (x - y) * (x - y))
            .sum();
        for (x, y) in ca.zip(cb) {
            for lane in 0..UNROLL {
                let d = x[lane] - y[lane];
                acc[lane] += d * d;
            }
        }
        acc.iter().sum::<f32>() + tail
    }

    #[inline]
    pub fn dot_and_norms(a: &[f32], b: &[f32]) -> (f32, f32, f32) {
        let mut dot = [0.0f32; UNROLL];
        let mut na = [0.0f32; UNROLL];
        let mut nb = [0.0f32; UNROLL];
        let (ca, cb) = (a.chunks_exact(UNROLL), b.chunks_exact(UNROLL));
        let (mut td, mut ta, mut tb) = (0.0f32, 0.0f32, 0.0f32);
        for (x, y) in ca.remainder().iter().zip(cb.remainder()) {
            td += x * y;
            ta += x * x;
            tb += y * y;
        }
        for (x, y) in ca.zip(cb) {
            for lane in 0..UNROLL {
                dot[lane] += x[lane] * y[lane];
                na[lane] += x[lane] * x[lane];
                nb[lane] += y[lane] * y[lane];
            }
        }
        (
            dot.iter().sum::<f32>() + td,
            na.iter().sum::<f32>() + ta,
            nb.iter().sum::<f32>() + tb,
        )
    }
}

// ── AVX2 + FMA (256-bit, 8 floats at a time) ──────────────────────────────────

#[cfg(target_arch = "x86_64")]
mod avx2 {
    use std::arch::x86_64::*;

    #[target_feature(enable = "avx2", enable = "fma")]
    pub unsafe fn dot(a: &[f32], b: &[f32]) -> f32 {
        let n = a.len().min(b.len());
        let chunks = n / 8;
        let (pa, pb) = (a.as_ptr(), b.as_ptr());
        let mut sum = _mm256_setzero_ps();
        for i in 0..chunks {
            let va = _mm256_loadu_ps(pa.add(i * 8));
            let vb = _mm256_loadu_ps(pb.add(i * 8));
            sum = _mm256_fmadd_ps(va, vb, sum);
        }
        let mut total = hsum(sum);
        for i in chunks * 8..n {
            total += a[i] * b[i];
        }
        total
    }

    #[target_feature(enable = "avx2", enable = "fma")]
    pub unsafe fn l2_squared(a: &[f32], b: &[f32]) -> f32 {
        let n = a.len().min(b.len());
        let chunks = n / 8;
        let (pa, pb) = (a.as_ptr(), b.as_ptr());
        let mut sum = _mm256_setzero_ps();
        for i in 0..chunks {
            let va = _mm256_loadu_ps(pa.add(i * 8));
            let vb = _mm256_loadu_ps(pb.add(i * 8));
            let d = _mm256_sub_ps(va, vb);
            sum = _mm256_fmadd_ps(d, d, sum);
        }
        let mut total = hsum(sum);
        for i in chunks * 8..n {
            let d = a[i] - b[i];
            total += d * d;
        }
        total
    }

    #[target_feature(enable = "avx2", enable = "fma")]
    pub unsafe fn dot_and_norms(a: &[f32], b: &[f32]) -> (f32, f32, f32) {
        let n = a.len().min(b.len());
        let chunks = n / 8;
        let (pa, pb) = (a.as_ptr(), b.as_ptr());
        let mut dot = _mm256_setzero_ps();
        let mut na = _mm256_setzero_ps();
        let mut nb = _mm256_setzero_ps();
        for i in 0..chunks {
            let va = _mm256_loadu_ps(pa.add(i * 8));
            let vb = _mm256_loadu_ps(pb.add(i * 8));
            dot = _mm256_fmadd_ps(va, vb, dot);
            na = _mm256_fmadd_ps(va, va, na);
            nb = _mm256_fmadd_ps(vb, vb, nb);
        }
        let (mut d, mut sa, mut sb) = (hsum(dot), hsum(na), hsum(nb));
        for i in chunks * 8..n {
            d += a[i] * b[i];
            sa += a[i] * a[i];
            sb += b[i] * b[i];
        }
        (d, sa, sb)
    }

    #[target_feature(enable = "avx2")]
    unsafe fn hsum(v: __m256) -> f32 {
        let hi = _mm256_extractf128_ps(v, 1);
        let lo = _mm256_castps256_ps128(v);
        let sum = _mm_add_ps(hi, lo);
        let shuf = _mm_movehdup_ps(sum);
        let sums = _mm_add_ps(sum, shuf);
        let shuf = _mm_movehl_ps(shuf, sums);
        let sums = _mm_add_ss(sums, shuf);
        _mm_cvtss_f32(sums)
    }
}

// ── NEON (128-bit, 4 floats at a time) ────────────────────────────────────────

#[cfg(target_arch = "aarch64")]
mod neon {
    use std::arch::aarch64::*;

    #[target_feature(enable = "neon")]
    pub unsafe fn dot(a: &[f32], b: &[f32]) -> f32 {
        let n = a.len().min(b.len());
        let chunks = n / 4;
        let mut acc = vdupq_n_f32(0.0);
        for i in 0..chunks {
            let va = vld1q_f32(a.as_ptr().add(i * 4));
            let vb = vld1q_f32(b.as_ptr().add(i * 4));
            acc = vfmaq_f32(acc, va, vb);
        }
        let mut total = vaddvq_f32(acc);
        for i in chunks * 4..n {
            total += a[i] * b[i];
        }
        total
    }

    #[target_feature(enable = "neon")]
    pub unsafe fn l2_squared(a: &[f32], b: &[f32]) -> f32 {
        let n = a.len().min(b.len());
        let chunks = n / 4;
        let mut acc = vdupq_n_f32(0.0);
        for i in 0..chunks {
            let va = vld1q_f32(a.as_ptr().add(i * 4));
            let vb = vld1q_f32(b.as_ptr().add(i * 4));
            let d = vsubq_f32(va, vb);
            acc = vfmaq_f32(acc, d, d);
        }
        let mut total = vaddvq_f32(acc);
        for i in chunks * 4..n {
            let d = a[i] - b[i];
            total += d * d;
        }
        total
    }

    #[target_feature(enable = "neon")]
    pub unsafe fn dot_and_norms(a: &[f32], b: &[f32]) -> (f32, f32, f32) {
        let n = a.len().min(b.len());
        let chunks = n / 4;
        let mut dot = vdupq_n_f32(0.0);
        let mut na = vdupq_n_f32(0.0);
        let mut nb = vdupq_n_f32(0.0);
        for i in 0..chunks {
            let va = vld1q_f32(a.as_ptr().add(i * 4));
            let vb = vld1q_f32(b.as_ptr().add(i * 4));
            dot = vfmaq_f32(dot, va, vb);
            na = vfmaq_f32(na, va, va);
            nb = vfmaq_f32(nb, vb, vb);
        }
        let (mut d, mut sa, mut sb) = (vaddvq_f32(dot), vaddvq_f32(na), vaddvq_f32(nb));
        for i in chunks * 4..n {
            d += a[i] * b[i];
            sa += a[i] * a[i];
            sb += b[i] * b[i];
        }
        (d, sa, sb)
    }
}
