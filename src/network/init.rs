//! Weight initialization
//!
//! Weights are drawn from a truncated normal distribution: values are sampled
//! from N(mean, stdev) and re-drawn whenever they fall outside two standard
//! deviations of the mean. Biases are filled with a small positive constant so
//! ReLU units start active.

use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

use crate::error::{Error, Result};

/// Standard deviation for weight initialization
pub const WEIGHT_STDEV: f32 = 0.1;

/// Constant fill value for bias vectors
pub const BIAS_FILL: f32 = 0.1;

/// Sample `count` values from a truncated normal distribution.
pub fn truncated_normal(count: usize, mean: f32, stdev: f32, rng: &mut StdRng) -> Result<Vec<f32>> {
    if stdev <= 0.0 {
        return Err(Error::invalid_input("stdev must be > 0"));
    }
    let normal = Normal::new(mean, stdev)
        .map_err(|e| Error::internal(format!("invalid normal distribution: {e}")))?;

    let lo = mean - 2.0 * stdev;
    let hi = mean + 2.0 * stdev;

    let mut samples = Vec::with_capacity(count);
    while samples.len() < count {
        let value = normal.sample(rng);
        if value >= lo && value <= hi {
            samples.push(value);
        }
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn samples_stay_within_two_stdevs() {
        let mut rng = StdRng::seed_from_u64(7);
        let samples = truncated_normal(10_000, 0.0, WEIGHT_STDEV, &mut rng).unwrap();

        assert_eq!(samples.len(), 10_000);
        for value in samples {
            assert!(value.abs() <= 2.0 * WEIGHT_STDEV);
        }
    }

    #[test]
    fn zero_stdev_is_rejected() {
        let mut rng = StdRng::seed_from_u64(7);
        assert!(truncated_normal(10, 0.0, 0.0, &mut rng).is_err());
    }
}
