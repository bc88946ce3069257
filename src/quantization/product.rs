//! Product quantization: per-subspace k-means codebooks, one byte per subspace.

use rand::rngs::StdRng;
use rand::SeedableRng;

use super::{
    check_sample, check_vector, reconstruction_error, CodeOrVector, QuantizationStrategy,
    QuantizedCode, Quantizer, QuantizerStats, TrainContext,
};
use crate::error::{Result, VectorError};
use crate::simd::Kernel;

/// Codes are single bytes, so a subspace can hold at most this many centroids.
pub const MAX_CENTROIDS: usize = 256;

/// Splits `D` dimensions into `m` contiguous subspaces and learns a k-means codebook
/// for each. Training needs at least as many vectors as centroids per subspace.
#[derive(Debug, Clone)]
pub struct ProductQuantizer {
    dimension: usize,
    subspaces: usize,
    subdim: usize,
    centroids: usize,
    iterations: usize,
    seed: u64,
    /// `[subspace][centroid * subdim + j]`
    codebooks: Option<Vec<Vec<f32>>>,
    training_samples: usize,
    error_rate: f32,
}

impl ProductQuantizer {
    pub fn new(
        dimension: usize,
        subspaces: usize,
        centroids: usize,
        iterations: usize,
        seed: u64,
    ) -> Result<Self> {
        if subspaces == 0 || dimension % subspaces != 0 {
            return Err(VectorError::InvalidInput(format!(
                "dimension {dimension} is not divisible into {subspaces} subspaces"
            )));
        }
        if centroids == 0 || centroids > MAX_CENTROIDS {
            return Err(VectorError::InvalidInput(format!(
                "centroids per subspace must be in 1..={MAX_CENTROIDS}, got {centroids}"
            )));
        }
        Ok(Self {
            dimension,
            subspaces,
            subdim: dimension / subspaces,
            centroids,
            iterations: iterations.max(1),
            seed,
            codebooks: None,
            training_samples: 0,
            error_rate: 0.0,
        })
    }

    /// Minimum training sample size.
    pub fn min_samples(&self) -> usize {
        self.centroids
    }

    fn codebooks(&self) -> Result<&[Vec<f32>]> {
        self.codebooks
            .as_deref()
            .ok_or(VectorError::QuantizerUntrained)
    }

    fn centroid<'a>(&self, book: &'a [f32], c: usize) -> &'a [f32] {
        &book[c * self.subdim..(c + 1) * self.subdim]
    }

    fn nearest(&self, kernel: &Kernel, book: &[f32], sub: &[f32]) -> usize {
        let mut best = (0usize, f32::INFINITY);
        for c in 0..self.centroids {
            let d = kernel.euclidean_distance_squared(sub, self.centroid(book, c));
            if d < best.1 {
                best = (c, d);
            }
        }
        best.0
    }

    /// Squared distance from each query subvector to every centroid:
    /// `table[s * centroids + c]`.
    pub fn distance_table(&self, query: &[f32]) -> Result<Vec<f32>> {
        let books = self.codebooks()?;
        check_vector(query, self.dimension)?;
        let kernel = Kernel::detect();
        let mut table = Vec::with_capacity(self.subspaces * self.centroids);
        for (s, book) in books.iter().enumerate() {
            let sub = &query[s * self.subdim..(s + 1) * self.subdim];
            for c in 0..self.centroids {
                table.push(kernel.euclidean_distance_squared(sub, self.centroid(book, c)));
            }
        }
        Ok(table)
    }

    fn lookup(&self, table: &[f32], codes: &[u8]) -> f32 {
        codes
            .iter()
            .enumerate()
            .map(|(s, &c)| table[s * self.centroids + c as usize])
            .sum::<f32>()
            .sqrt()
    }

    fn codes<'a>(&self, code: &'a QuantizedCode) -> Result<&'a [u8]> {
        match code {
            QuantizedCode::Product(codes) if codes.len() == self.subspaces => {
                match codes.iter().find(|&&c| c as usize >= self.centroids) {
                    Some(c) => Err(VectorError::InvalidInput(format!(
                        "centroid {c} out of range for {} centroids",
                        self.centroids
                    ))),
                    None => Ok(codes),
                }
            }
            _ => Err(VectorError::InvalidInput(format!(
                "expected a product code with {} subspaces",
                self.subspaces
            ))),
        }
    }
}

impl Quantizer for ProductQuantizer {
    fn strategy(&self) -> QuantizationStrategy {
        QuantizationStrategy::Product
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn train(&mut self, sample: &[Vec<f32>], ctx: &TrainContext) -> Result<()> {
        check_sample(sample, self.dimension, self.min_samples())?;
        let kernel = Kernel::detect();
        let mut rng = StdRng::seed_from_u64(self.seed);

        let mut books = Vec::with_capacity(self.subspaces);
        for s in 0..self.subspaces {
            ctx.check()?;
            let range = s * self.subdim..(s + 1) * self.subdim;
            let subvectors: Vec<&[f32]> = sample.iter().map(|v| &v[range.clone()]).collect();
            books.push(kmeans(
                &kernel,
                &subvectors,
                self.subdim,
                self.centroids,
                self.iterations,
                &mut rng,
                ctx,
            )?);
        }

        self.codebooks = Some(books);
        self.training_samples = sample.len();
        self.error_rate = reconstruction_error(&*self, sample)?;
        tracing::debug!(
            subspaces = self.subspaces,
            centroids = self.centroids,
            samples = sample.len(),
            error_rate = self.error_rate,
            "product quantizer trained"
        );
        Ok(())
    }

    fn is_trained(&self) -> bool {
        self.codebooks.is_some()
    }

    fn encode(&self, vector: &[f32]) -> Result<QuantizedCode> {
        let books = self.codebooks()?;
        check_vector(vector, self.dimension)?;
        let kernel = Kernel::detect();
        let codes = books
            .iter()
            .enumerate()
            .map(|(s, book)| {
                let sub = &vector[s * self.subdim..(s + 1) * self.subdim];
                self.nearest(&kernel, book, sub) as u8
            })
            .collect();
        Ok(QuantizedCode::Product(codes))
    }

    fn decode(&self, code: &QuantizedCode) -> Result<Vec<f32>> {
        let books = self.codebooks()?;
        let codes = self.codes(code)?;
        let mut out = Vec::with_capacity(self.dimension);
        for (book, &c) in books.iter().zip(codes) {
            out.extend_from_slice(self.centroid(book, c as usize));
        }
        Ok(out)
    }

    fn distance(&self, code: &QuantizedCode, other: CodeOrVector<'_>) -> Result<f32> {
        let books = self.codebooks()?;
        let a = self.codes(code)?;
        match other {
            CodeOrVector::Code(b) => {
                let b = self.codes(b)?;
                let kernel = Kernel::detect();
                let sum: f32 = books
                    .iter()
                    .zip(a.iter().zip(b))
                    .map(|(book, (&ca, &cb))| {
                        kernel.euclidean_distance_squared(
                            self.centroid(book, ca as usize),
                            self.centroid(book, cb as usize),
                        )
                    })
                    .sum();
                Ok(sum.sqrt())
            }
            CodeOrVector::Vector(v) => Ok(self.lookup(&self.distance_table(v)?, a)),
        }
    }

    /// Builds the lookup table once and reuses it for every code.
    fn scan(&self, query: &[f32], codes: &[&QuantizedCode]) -> Result<Vec<f32>> {
        let table = self.distance_table(query)?;
        codes
            .iter()
            .map(|c| Ok(self.lookup(&table, self.codes(c)?)))
            .collect()
    }

    fn stats(&self) -> QuantizerStats {
        QuantizerStats {
            strategy: "product".into(),
            trained: self.is_trained(),
            training_samples: self.training_samples,
            compression_ratio: (self.dimension * 4) as f32 / self.subspaces as f32,
            estimated_error_rate: self.error_rate,
        }
    }
}

/// Lloyd's k-means over `points`, seeded with `k` distinct sample points.
/// Returns centroids flattened as `[c * dim + j]`. Empty clusters keep their
/// previous centroid.
fn kmeans(
    kernel: &Kernel,
    points: &[&[f32]],
    dim: usize,
    k: usize,
    iterations: usize,
    rng: &mut StdRng,
    ctx: &TrainContext,
) -> Result<Vec<f32>> {
    let mut centroids = Vec::with_capacity(k * dim);
    for idx in rand::seq::index::sample(rng, points.len(), k).into_iter() {
        centroids.extend_from_slice(points[idx]);
    }

    let mut assignment = vec![usize::MAX; points.len()];
    for _ in 0..iterations {
        ctx.check()?;

        let mut changed = false;
        for (i, p) in points.iter().enumerate() {
            let mut best = (0usize, f32::INFINITY);
            for c in 0..k {
                let d = kernel.euclidean_distance_squared(p, &centroids[c * dim..(c + 1) * dim]);
                if d < best.1 {
                    best = (c, d);
                }
            }
            if assignment[i] != best.0 {
                assignment[i] = best.0;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        let mut sums = vec![0.0f32; k * dim];
        let mut counts = vec![0usize; k];
        for (p, &c) in points.iter().zip(&assignment) {
            counts[c] += 1;
            for (s, x) in sums[c * dim..(c + 1) * dim].iter_mut().zip(p.iter()) {
                *s += x;
            }
        }
        for c in 0..k {
            if counts[c] == 0 {
                continue;
            }
            let inv = 1.0 / counts[c] as f32;
            for j in 0..dim {
                centroids[c * dim + j] = sums[c * dim + j] * inv;
            }
        }
    }
    Ok(centroids)
}
