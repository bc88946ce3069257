//! Per-dimension linear quantization to 4 or 8 bits.

use super::{
    check_sample, check_vector, reconstruction_error, CodeOrVector, QuantizationStrategy,
    QuantizedCode, Quantizer, QuantizerStats, TrainContext,
};
use crate::error::{Result, VectorError};
use crate::simd::Kernel;

/// Fewest training vectors that give a meaningful min/max per dimension.
pub const MIN_SCALAR_SAMPLES: usize = 2;

#[derive(Debug, Clone)]
struct Bounds {
    min: Vec<f32>,
    /// `range / levels` per dimension; zero for constant dimensions.
    step: Vec<f32>,
}

/// Linear quantizer with per-dimension bounds learned from a training sample.
///
/// With `levels = 2^bits - 1`, rounding to the nearest level bounds the per-dimension
/// reconstruction error by `range / (2 * levels)` for values inside the trained range.
/// Values outside it are clamped.
#[derive(Debug, Clone)]
pub struct ScalarQuantizer {
    dimension: usize,
    bits: u8,
    bounds: Option<Bounds>,
    training_samples: usize,
    error_rate: f32,
}

impl ScalarQuantizer {
    pub fn new(dimension: usize, bits: u8) -> Result<Self> {
        if bits != 4 && bits != 8 {
            return Err(VectorError::InvalidInput(format!(
                "scalar quantization supports 4 or 8 bits, got {bits}"
            )));
        }
        Ok(Self {
            dimension,
            bits,
            bounds: None,
            training_samples: 0,
            error_rate: 0.0,
        })
    }

    pub fn bits(&self) -> u8 {
        self.bits
    }

    fn levels(&self) -> f32 {
        ((1u32 << self.bits) - 1) as f32
    }

    fn bounds(&self) -> Result<&Bounds> {
        self.bounds.as_ref().ok_or(VectorError::QuantizerUntrained)
    }

    fn level_of(&self, bounds: &Bounds, dim: usize, value: f32) -> u8 {
        let step = bounds.step[dim];
        if step == 0.0 {
            return 0;
        }
        ((value - bounds.min[dim]) / step)
            .round()
            .clamp(0.0, self.levels()) as u8
    }

    fn unpack(&self, data: &[u8]) -> Vec<u8> {
        match self.bits {
            8 => data.to_vec(),
            _ => (0..self.dimension)
                .map(|i| (data[i / 2] >> (4 * (i % 2))) & 0x0F)
                .collect(),
        }
    }
}

impl Quantizer for ScalarQuantizer {
    fn strategy(&self) -> QuantizationStrategy {
        QuantizationStrategy::Scalar
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn train(&mut self, sample: &[Vec<f32>], ctx: &TrainContext) -> Result<()> {
        check_sample(sample, self.dimension, MIN_SCALAR_SAMPLES)?;
        ctx.check()?;

        let mut min = vec![f32::INFINITY; self.dimension];
        let mut max = vec![f32::NEG_INFINITY; self.dimension];
        for v in sample {
            for (d, &x) in v.iter().enumerate() {
                min[d] = min[d].min(x);
                max[d] = max[d].max(x);
            }
        }
        let levels = self.levels();
        let step = min.iter().zip(&max).map(|(lo, hi)| (hi - lo) / levels).collect();

        self.bounds = Some(Bounds { min, step });
        self.training_samples = sample.len();
        self.error_rate = reconstruction_error(&*self, sample)?;
        tracing::debug!(bits = self.bits, samples = sample.len(), error_rate = self.error_rate, "scalar quantizer trained");
        Ok(())
    }

    fn is_trained(&self) -> bool {
        self.bounds.is_some()
    }

    fn encode(&self, vector: &[f32]) -> Result<QuantizedCode> {
        let bounds = self.bounds()?;
        check_vector(vector, self.dimension)?;

        let data = match self.bits {
            8 => vector
                .iter()
                .enumerate()
                .map(|(d, &x)| self.level_of(bounds, d, x))
                .collect(),
            _ => {
                let mut packed = vec![0u8; self.dimension.div_ceil(2)];
                for (d, &x) in vector.iter().enumerate() {
                    packed[d / 2] |= self.level_of(bounds, d, x) << (4 * (d % 2));
                }
                packed
            }
        };
        Ok(QuantizedCode::Scalar {
            bits: self.bits,
            data,
        })
    }

    fn decode(&self, code: &QuantizedCode) -> Result<Vec<f32>> {
        let bounds = self.bounds()?;
        let QuantizedCode::Scalar { bits, data } = code else {
            return Err(VectorError::InvalidInput("expected a scalar code".into()));
        };
        if *bits != self.bits {
            return Err(VectorError::InvalidInput(format!(
                "code has {bits} bits, quantizer uses {}",
                self.bits
            )));
        }
        let expected = match self.bits {
            8 => self.dimension,
            _ => self.dimension.div_ceil(2),
        };
        if data.len() != expected {
            return Err(VectorError::InvalidInput(format!(
                "scalar code has {} bytes, expected {expected}",
                data.len()
            )));
        }
        Ok(self
            .unpack(data)
            .into_iter()
            .enumerate()
            .map(|(d, q)| bounds.min[d] + q as f32 * bounds.step[d])
            .collect())
    }

    fn distance(&self, code: &QuantizedCode, other: CodeOrVector<'_>) -> Result<f32> {
        let a = self.decode(code)?;
        let kernel = Kernel::detect();
        match other {
            CodeOrVector::Code(b) => Ok(kernel.euclidean_distance(&a, &self.decode(b)?)),
            CodeOrVector::Vector(v) => {
                check_vector(v, self.dimension)?;
                Ok(kernel.euclidean_distance(&a, v))
            }
        }
    }

    fn stats(&self) -> QuantizerStats {
        QuantizerStats {
            strategy: format!("scalar{}", self.bits),
            trained: self.is_trained(),
            training_samples: self.training_samples,
            compression_ratio: 32.0 / self.bits as f32,
            estimated_error_rate: self.error_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(n: usize, dim: usize) -> Vec<Vec<f32>> {
        (0..n)
            .map(|i| (0..dim).map(|d| ((i * 7 + d * 3) as f32 * 0.13).sin() * 2.0).collect())
            .collect()
    }

    #[test]
    fn eight_bit_error_is_bounded_by_range_over_256() {
        let data = sample(64, 12);
        let mut q = ScalarQuantizer::new(12, 8).unwrap();
        q.train(&data, &TrainContext::new()).unwrap();

        let bounds = q.bounds().unwrap().clone();
        for v in &data {
            let approx = q.decode(&q.encode(v).unwrap()).unwrap();
            for d in 0..12 {
                let range = bounds.step[d] * 255.0;
                assert!(
                    (approx[d] - v[d]).abs() <= range / 256.0 + 1e-6,
                    "dim {d}: {} vs {}",
                    approx[d],
                    v[d]
                );
            }
        }
    }

    #[test]
    fn four_bit_codes_pack_two_per_byte() {
        let data = sample(16, 9);
        let mut q = ScalarQuantizer::new(9, 4).unwrap();
        q.train(&data, &TrainContext::new()).unwrap();

        let code = q.encode(&data[3]).unwrap();
        assert_eq!(code.byte_len(), 5);
        let approx = q.decode(&code).unwrap();
        assert_eq!(approx.len(), 9);
        assert_eq!(q.stats().compression_ratio, 8.0);
    }

    #[test]
    fn encode_before_train_fails() {
        let q = ScalarQuantizer::new(4, 8).unwrap();
        assert!(matches!(
            q.encode(&[0.0; 4]),
            Err(VectorError::QuantizerUntrained)
        ));
    }

    #[test]
    fn wrong_length_codes_are_invalid_input() {
        let data = sample(16, 4);
        let mut four = ScalarQuantizer::new(4, 4).unwrap();
        four.train(&data, &TrainContext::new()).unwrap();
        let short = QuantizedCode::Scalar { bits: 4, data: vec![1] };
        assert!(matches!(four.decode(&short), Err(VectorError::InvalidInput(_))));
        assert!(matches!(
            four.distance(&short, CodeOrVector::Vector(&data[0])),
            Err(VectorError::InvalidInput(_))
        ));

        let mut eight = ScalarQuantizer::new(4, 8).unwrap();
        eight.train(&data, &TrainContext::new()).unwrap();
        let long = QuantizedCode::Scalar { bits: 8, data: vec![0; 5] };
        assert!(matches!(eight.decode(&long), Err(VectorError::InvalidInput(_))));
    }

    #[test]
    fn rejects_unsupported_bit_width() {
        assert!(ScalarQuantizer::new(4, 6).is_err());
    }

    #[test]
    fn single_sample_is_not_enough() {
        let mut q = ScalarQuantizer::new(3, 8).unwrap();
        let err = q.train(&[vec![1.0, 2.0, 3.0]], &TrainContext::new()).unwrap_err();
        assert!(matches!(
            err,
            VectorError::InsufficientTrainingData { required: 2, actual: 1 }
        ));
        assert!(!q.is_trained());
    }
}
