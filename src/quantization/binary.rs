//! Sign-of-centered-value binarization with Hamming distance.

use super::{
    check_sample, check_vector, reconstruction_error, CodeOrVector, QuantizationStrategy,
    QuantizedCode, Quantizer, QuantizerStats, TrainContext,
};
use crate::error::{Result, VectorError};

pub const MIN_BINARY_SAMPLES: usize = 2;

#[derive(Debug, Clone)]
struct Centering {
    mean: Vec<f32>,
    /// Mean absolute deviation per dimension; the decode magnitude.
    spread: Vec<f32>,
}

/// One bit per dimension: set when the value is above the trained per-dimension mean.
#[derive(Debug, Clone)]
pub struct BinaryQuantizer {
    dimension: usize,
    centering: Option<Centering>,
    training_samples: usize,
    error_rate: f32,
}

impl BinaryQuantizer {
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(VectorError::InvalidInput(
                "binary quantizer needs a non-zero dimension".into(),
            ));
        }
        Ok(Self {
            dimension,
            centering: None,
            training_samples: 0,
            error_rate: 0.0,
        })
    }

    fn words(&self) -> usize {
        self.dimension.div_ceil(64)
    }

    fn centering(&self) -> Result<&Centering> {
        self.centering
            .as_ref()
            .ok_or(VectorError::QuantizerUntrained)
    }

    fn binarize(&self, centering: &Centering, vector: &[f32]) -> Vec<u64> {
        let mut words = vec![0u64; self.words()];
        for (d, (&x, &m)) in vector.iter().zip(&centering.mean).enumerate() {
            if x > m {
                words[d / 64] |= 1u64 << (d % 64);
            }
        }
        words
    }

    fn bits<'a>(&self, code: &'a QuantizedCode) -> Result<&'a [u64]> {
        match code {
            QuantizedCode::Binary(words) if words.len() == self.words() => Ok(words),
            _ => Err(VectorError::InvalidInput(format!(
                "expected a binary code of {} words",
                self.words()
            ))),
        }
    }
}

fn hamming(a: &[u64], b: &[u64]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x ^ y).count_ones()).sum::<u32>() as f32
}

impl Quantizer for BinaryQuantizer {
    fn strategy(&self) -> QuantizationStrategy {
        QuantizationStrategy::Binary
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn train(&mut self, sample: &[Vec<f32>], ctx: &TrainContext) -> Result<()> {
        check_sample(sample, self.dimension, MIN_BINARY_SAMPLES)?;
        ctx.check()?;

        let n = sample.len() as f32;
        let mut mean = vec![0.0f32; self.dimension];
        for v in sample {
            for (m, x) in mean.iter_mut().zip(v) {
                *m += x;
            }
        }
        mean.iter_mut().for_each(|m| *m /= n);

        let mut spread = vec![0.0f32; self.dimension];
        for v in sample {
            for ((s, x), m) in spread.iter_mut().zip(v).zip(&mean) {
                *s += (x - m).abs();
            }
        }
        spread.iter_mut().for_each(|s| *s /= n);

        self.centering = Some(Centering { mean, spread });
        self.training_samples = sample.len();
        self.error_rate = reconstruction_error(&*self, sample)?;
        tracing::debug!(
            samples = sample.len(),
            error_rate = self.error_rate,
            "binary quantizer trained"
        );
        Ok(())
    }

    fn is_trained(&self) -> bool {
        self.centering.is_some()
    }

    fn encode(&self, vector: &[f32]) -> Result<QuantizedCode> {
        let centering = self.centering()?;
        check_vector(vector, self.dimension)?;
        Ok(QuantizedCode::Binary(self.binarize(centering, vector)))
    }

    fn decode(&self, code: &QuantizedCode) -> Result<Vec<f32>> {
        let centering = self.centering()?;
        let words = self.bits(code)?;
        Ok((0..self.dimension)
            .map(|d| {
                let set = words[d / 64] >> (d % 64) & 1 == 1;
                let delta = centering.spread[d];
                centering.mean[d] + if set { delta } else { -delta }
            })
            .collect())
    }

    /// Hamming distance between bit codes; raw vectors are binarized first.
    fn distance(&self, code: &QuantizedCode, other: CodeOrVector<'_>) -> Result<f32> {
        let a = self.bits(code)?;
        match other {
            CodeOrVector::Code(b) => Ok(hamming(a, self.bits(b)?)),
            CodeOrVector::Vector(v) => {
                let centering = self.centering()?;
                check_vector(v, self.dimension)?;
                Ok(hamming(a, &self.binarize(centering, v)))
            }
        }
    }

    fn scan(&self, query: &[f32], codes: &[&QuantizedCode]) -> Result<Vec<f32>> {
        let centering = self.centering()?;
        check_vector(query, self.dimension)?;
        let q = self.binarize(centering, query);
        codes.iter().map(|c| Ok(hamming(self.bits(c)?, &q))).collect()
    }

    fn stats(&self) -> QuantizerStats {
        QuantizerStats {
            strategy: "binary".into(),
            trained: self.is_trained(),
            training_samples: self.training_samples,
            compression_ratio: 32.0,
            estimated_error_rate: self.error_rate,
        }
    }
}
