//! Monte-Carlo estimation of the diagonal Fisher information
//!
//! The Fisher information is the variance of the score, the gradient of the
//! log-likelihood with respect to each parameter. The estimator draws single
//! validation points, samples a class index from the model's own output
//! distribution (not the ground truth), and accumulates the squared gradient
//! of that one log-probability per parameter. Dividing the accumulated sums
//! by the draw count gives the Monte-Carlo estimate of the diagonal.

use candle_core::IndexOp;
use rand::distr::weighted::WeightedIndex;
use rand::distr::Distribution;
use rand::rngs::StdRng;
use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::network::ClassifierNet;
use crate::params::NamedTensors;
use crate::training::data::SampleSource;

/// Diagonal Fisher-information estimator
#[derive(Debug, Clone, Copy, Default)]
pub struct FisherEstimator;

impl FisherEstimator {
    /// Create a new estimator
    pub fn new() -> Self {
        Self
    }

    /// Estimate the Fisher diagonal for every parameter of `network`.
    ///
    /// Draws `num_samples` points from `samples` without replacement; asking
    /// for more than the pool holds is an explicit
    /// [`Error::InsufficientSamples`], never a silent redraw. The network is
    /// not mutated; the only output is the returned diagonals, one per
    /// parameter with matching shapes and all entries non-negative.
    #[instrument(skip(self, network, samples, rng))]
    pub fn estimate(
        &self,
        network: &ClassifierNet,
        samples: &mut dyn SampleSource,
        num_samples: usize,
        rng: &mut StdRng,
    ) -> Result<NamedTensors> {
        if num_samples == 0 {
            return Err(Error::invalid_input("Fisher estimation needs num_samples > 0"));
        }
        if samples.remaining() < num_samples {
            return Err(Error::InsufficientSamples {
                requested: num_samples,
                available: samples.remaining(),
            });
        }

        let parameters = network.named_parameters();
        let mut accumulators: Vec<(String, candle_core::Tensor)> = parameters
            .iter()
            .map(|(name, var)| Ok((name.clone(), var.as_tensor().zeros_like()?)))
            .collect::<Result<_>>()?;

        for _ in 0..num_samples {
            let input = samples.draw()?;
            let log_probs = network.forward(&input, false)?;

            // Sample one class from the output distribution; the forward pass
            // already applied log-softmax, so exponentiate to recover
            // probabilities.
            let probs: Vec<f32> = log_probs.exp()?.squeeze(0)?.to_vec1()?;
            let class = WeightedIndex::new(&probs)
                .map_err(|e| Error::internal(format!("class distribution unusable: {e}")))?
                .sample(rng);

            // Score: gradient of this single log-probability w.r.t. every
            // parameter.
            let log_prob = log_probs.i((0, class))?;
            let gradients = log_prob.backward()?;

            for (index, (name, var)) in parameters.iter().enumerate() {
                let gradient = gradients
                    .get(var)
                    .ok_or_else(|| Error::internal(format!("no gradient for `{name}`")))?;
                let updated = (&accumulators[index].1 + &gradient.sqr()?)?;
                accumulators[index].1 = updated;
            }
        }

        let scale = 1.0 / num_samples as f64;
        let mut fisher = NamedTensors::new();
        for (name, sum) in accumulators {
            fisher.push(name, (sum * scale)?);
        }

        debug!(
            num_samples,
            parameters = fisher.len(),
            "estimated Fisher diagonal"
        );
        Ok(fisher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;
    use crate::training::data::{Batch, ValidationSampler};
    use candle_core::{Device, Tensor};
    use rand::SeedableRng;

    fn test_network() -> ClassifierNet {
        let config = NetworkConfig {
            input_size: 5,
            hidden_size: 4,
            output_size: 3,
            hidden_layer_count: 0,
            input_dropout: 0.0,
            hidden_dropout: 0.0,
        };
        let mut rng = StdRng::seed_from_u64(11);
        ClassifierNet::new(&config, &Device::Cpu, &mut rng).unwrap()
    }

    fn validation_batch(samples: usize) -> Batch {
        let mut rng = StdRng::seed_from_u64(23);
        let values: Vec<f32> = (0..samples * 5)
            .map(|_| {
                use rand::Rng;
                rng.random_range(-1.0..1.0)
            })
            .collect();
        let inputs = Tensor::from_vec(values, (samples, 5), &Device::Cpu).unwrap();
        let labels = Tensor::from_vec(vec![0u32; samples], samples, &Device::Cpu).unwrap();
        Batch::new(inputs, labels).unwrap()
    }

    #[test]
    fn fisher_entries_are_non_negative() {
        let network = test_network();
        let batch = validation_batch(16);
        let mut rng = StdRng::seed_from_u64(3);
        let mut sampler = ValidationSampler::new(&batch, &mut rng).unwrap();

        let fisher = FisherEstimator::new()
            .estimate(&network, &mut sampler, 8, &mut rng)
            .unwrap();

        assert_eq!(fisher.len(), network.named_parameters().len());
        for (name, diagonal) in fisher.iter() {
            let values = diagonal.flatten_all().unwrap().to_vec1::<f32>().unwrap();
            assert!(
                values.iter().all(|&v| v >= 0.0),
                "negative Fisher entry in `{name}`"
            );
        }
    }

    #[test]
    fn fisher_shapes_match_parameters() {
        let network = test_network();
        let batch = validation_batch(8);
        let mut rng = StdRng::seed_from_u64(3);
        let mut sampler = ValidationSampler::new(&batch, &mut rng).unwrap();

        let fisher = FisherEstimator::new()
            .estimate(&network, &mut sampler, 4, &mut rng)
            .unwrap();

        for (name, var) in network.named_parameters() {
            let diagonal = fisher.get(&name).expect("missing diagonal");
            assert_eq!(diagonal.dims(), var.as_tensor().dims());
        }
    }

    #[test]
    fn exhausted_pool_is_an_explicit_error() {
        let network = test_network();
        let batch = validation_batch(4);
        let mut rng = StdRng::seed_from_u64(3);
        let mut sampler = ValidationSampler::new(&batch, &mut rng).unwrap();

        let err = FisherEstimator::new()
            .estimate(&network, &mut sampler, 10, &mut rng)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientSamples {
                requested: 10,
                available: 4
            }
        ));
    }
}
