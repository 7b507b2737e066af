//! Network expansion with weight transplant

use rand::rngs::StdRng;
use tracing::{info, instrument};

use crate::config::GrowthInit;
use crate::error::{Error, Result};
use crate::network::ClassifierNet;
use crate::params::embed_top_left;

/// Record of one expansion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpansionEvent {
    /// Task whose threshold miss triggered the expansion
    pub task: usize,
    /// Hidden width before the expansion
    pub previous_hidden: usize,
    /// Hidden width after the expansion
    pub new_hidden: usize,
}

/// Builds enlarged networks that preserve every trained weight.
///
/// Expansion never shrinks; the scale factor is validated at construction.
/// The transplant walks the parameter manifest by name, writing each old
/// tensor into the top-left region of its enlarged counterpart, so the
/// correspondence between the two parameter sets is explicit rather than an
/// artifact of iteration order. All tensors grow in one pass; there is no
/// partially-expanded state.
#[derive(Debug, Clone, Copy)]
pub struct NetworkExpander {
    scale_factor: usize,
    growth_init: GrowthInit,
}

impl NetworkExpander {
    /// Create an expander
    pub fn new(scale_factor: usize, growth_init: GrowthInit) -> Result<Self> {
        if scale_factor < 1 {
            return Err(Error::invalid_input("expansion scale factor must be >= 1"));
        }
        Ok(Self {
            scale_factor,
            growth_init,
        })
    }

    /// Configured scale factor
    pub fn scale_factor(&self) -> usize {
        self.scale_factor
    }

    /// Produce a network with every hidden dimension multiplied by the scale
    /// factor and all of `network`'s weights transplanted.
    ///
    /// The growth region holds freshly initialized values or zeros depending
    /// on the configured [`GrowthInit`]; the transplanted region is copied
    /// exactly. The input network is left untouched.
    #[instrument(skip(self, network, rng))]
    pub fn expand(&self, network: &ClassifierNet, rng: &mut StdRng) -> Result<ClassifierNet> {
        let dims = network.dims().scaled(self.scale_factor);
        let (input_dropout, hidden_dropout) = network.dropout_probs();

        let grown = match self.growth_init {
            GrowthInit::Fresh => ClassifierNet::with_dims(
                dims,
                input_dropout,
                hidden_dropout,
                network.device(),
                rng,
            )?,
            GrowthInit::Zero => {
                ClassifierNet::zeros(dims, input_dropout, hidden_dropout, network.device())?
            }
        };

        for (name, old_var) in network.named_parameters() {
            let new_var = grown
                .parameter(&name)
                .ok_or_else(|| Error::internal(format!("expanded network lacks `{name}`")))?;
            let merged = embed_top_left(new_var.as_tensor(), old_var.as_tensor(), &name)?;
            new_var.set(&merged)?;
        }

        info!(
            previous_hidden = network.hidden_size(),
            new_hidden = grown.hidden_size(),
            "expanded network capacity"
        );
        Ok(grown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;
    use candle_core::Device;
    use rand::SeedableRng;
    use test_case::test_case;

    fn test_network() -> ClassifierNet {
        let config = NetworkConfig {
            input_size: 6,
            hidden_size: 4,
            output_size: 3,
            hidden_layer_count: 1,
            input_dropout: 0.0,
            hidden_dropout: 0.0,
        };
        let mut rng = StdRng::seed_from_u64(13);
        ClassifierNet::new(&config, &Device::Cpu, &mut rng).unwrap()
    }

    fn flat(tensor: &candle_core::Tensor) -> Vec<f32> {
        tensor.flatten_all().unwrap().to_vec1::<f32>().unwrap()
    }

    #[test]
    fn zero_scale_factor_is_rejected() {
        assert!(NetworkExpander::new(0, GrowthInit::Fresh).is_err());
    }

    #[test_case(GrowthInit::Fresh; "fresh growth")]
    #[test_case(GrowthInit::Zero; "zero growth")]
    fn expansion_preserves_old_weights_exactly(growth: GrowthInit) {
        let network = test_network();
        let expander = NetworkExpander::new(2, growth).unwrap();
        let mut rng = StdRng::seed_from_u64(29);
        let grown = expander.expand(&network, &mut rng).unwrap();

        assert_eq!(grown.hidden_size(), 8);

        for (name, old_var) in network.named_parameters() {
            let new_var = grown.parameter(&name).unwrap();
            let restricted = crate::params::narrow_to(
                new_var.as_tensor(),
                old_var.as_tensor().dims(),
                &name,
            )
            .unwrap();
            assert_eq!(
                flat(&restricted),
                flat(old_var.as_tensor()),
                "weights of `{name}` changed during expansion"
            );
        }
    }

    #[test]
    fn zero_growth_pads_the_remainder_with_zeros() {
        let network = test_network();
        let expander = NetworkExpander::new(2, GrowthInit::Zero).unwrap();
        let mut rng = StdRng::seed_from_u64(29);
        let grown = expander.expand(&network, &mut rng).unwrap();

        for (name, old_var) in network.named_parameters() {
            let old_dims = old_var.as_tensor().dims().to_vec();
            let new_var = grown.parameter(&name).unwrap();
            let new_dims = new_var.as_tensor().dims().to_vec();

            match (old_dims.as_slice(), new_dims.as_slice()) {
                (&[old_r, old_c], &[new_r, new_c]) => {
                    let values = new_var.as_tensor().to_vec2::<f32>().unwrap();
                    for (r, row) in values.iter().enumerate().take(new_r) {
                        for (c, &value) in row.iter().enumerate().take(new_c) {
                            if r >= old_r || c >= old_c {
                                assert_eq!(value, 0.0, "growth region of `{name}` not zero");
                            }
                        }
                    }
                }
                (&[old_n], &[new_n]) => {
                    let values = new_var.as_tensor().to_vec1::<f32>().unwrap();
                    for &value in values.iter().take(new_n).skip(old_n) {
                        assert_eq!(value, 0.0, "growth region of `{name}` not zero");
                    }
                }
                _ => panic!("unexpected parameter rank for `{name}`"),
            }
        }
    }

    #[test]
    fn unit_scale_factor_is_a_faithful_copy() {
        let network = test_network();
        let expander = NetworkExpander::new(1, GrowthInit::Zero).unwrap();
        let mut rng = StdRng::seed_from_u64(29);
        let copy = expander.expand(&network, &mut rng).unwrap();

        assert_eq!(copy.hidden_size(), network.hidden_size());
        for (name, old_var) in network.named_parameters() {
            let new_var = copy.parameter(&name).unwrap();
            assert_eq!(flat(new_var.as_tensor()), flat(old_var.as_tensor()));
        }
    }

    #[test]
    fn expansion_scales_every_hidden_dimension_together() {
        let network = test_network();
        let expander = NetworkExpander::new(3, GrowthInit::Fresh).unwrap();
        let mut rng = StdRng::seed_from_u64(29);
        let grown = expander.expand(&network, &mut rng).unwrap();

        let shapes: std::collections::HashMap<String, Vec<usize>> =
            grown.parameter_shapes().into_iter().collect();
        assert_eq!(shapes["fc0.weight"], vec![12, 6]);
        assert_eq!(shapes["fc0.bias"], vec![12]);
        assert_eq!(shapes["fc1.weight"], vec![12, 12]);
        assert_eq!(shapes["fc1.bias"], vec![12]);
        assert_eq!(shapes["fc2.weight"], vec![3, 12]);
        assert_eq!(shapes["fc2.bias"], vec![3]);
    }

    #[test]
    fn source_network_is_untouched() {
        let network = test_network();
        let before = network.parameter_snapshot().unwrap();

        let expander = NetworkExpander::new(2, GrowthInit::Fresh).unwrap();
        let mut rng = StdRng::seed_from_u64(29);
        let _ = expander.expand(&network, &mut rng).unwrap();

        for (name, var) in network.named_parameters() {
            assert_eq!(flat(var.as_tensor()), flat(before.get(&name).unwrap()));
        }
    }
}
