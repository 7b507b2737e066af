//! Classifier network implementation

use candle_core::{DType, Device, Tensor, Var, D};
use candle_nn::ops::{dropout, log_softmax};
use rand::rngs::StdRng;

use super::init::{truncated_normal, BIAS_FILL, WEIGHT_STDEV};
use crate::error::{Error, Result};
use crate::params::{deep_copy, NamedTensors};

/// Layer dimensions of a classifier network.
///
/// `hidden` is the only dimension that changes across expansions; input and
/// output sizes are fixed by the task family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkDims {
    /// Number of input features
    pub input: usize,
    /// Hidden-layer width
    pub hidden: usize,
    /// Number of output classes
    pub output: usize,
    /// Count of hidden-to-hidden layers beyond the input layer
    pub hidden_layer_count: usize,
}

impl NetworkDims {
    /// Dimensions from a network configuration
    pub fn from_config(config: &crate::config::NetworkConfig) -> Self {
        Self {
            input: config.input_size,
            hidden: config.hidden_size,
            output: config.output_size,
            hidden_layer_count: config.hidden_layer_count,
        }
    }

    /// Dimensions with the hidden width multiplied by `factor`
    pub fn scaled(&self, factor: usize) -> Self {
        Self {
            hidden: self.hidden * factor,
            ..*self
        }
    }

    /// Dimensions with the hidden width replaced by `hidden`
    pub fn with_hidden(&self, hidden: usize) -> Self {
        Self { hidden, ..*self }
    }

    /// `(in_features, out_features)` for every layer, input to output
    fn layer_sizes(&self) -> Vec<(usize, usize)> {
        let mut sizes = vec![(self.input, self.hidden)];
        for _ in 0..self.hidden_layer_count {
            sizes.push((self.hidden, self.hidden));
        }
        sizes.push((self.hidden, self.output));
        sizes
    }
}

/// Single dense layer holding its parameters as autograd variables
#[derive(Debug)]
struct DenseLayer {
    name: String,
    weight: Var,
    bias: Var,
}

impl DenseLayer {
    /// Layer with truncated-normal weights and constant-filled bias
    fn init(
        name: String,
        in_features: usize,
        out_features: usize,
        device: &Device,
        rng: &mut StdRng,
    ) -> Result<Self> {
        let values = truncated_normal(out_features * in_features, 0.0, WEIGHT_STDEV, rng)?;
        let weight = Tensor::from_vec(values, (out_features, in_features), device)?;
        let bias = Tensor::full(BIAS_FILL, out_features, device)?;
        Ok(Self {
            name,
            weight: Var::from_tensor(&weight)?,
            bias: Var::from_tensor(&bias)?,
        })
    }

    /// Layer with all parameters zero
    fn zeros(
        name: String,
        in_features: usize,
        out_features: usize,
        device: &Device,
    ) -> Result<Self> {
        let weight = Tensor::zeros((out_features, in_features), DType::F32, device)?;
        let bias = Tensor::zeros(out_features, DType::F32, device)?;
        Ok(Self {
            name,
            weight: Var::from_tensor(&weight)?,
            bias: Var::from_tensor(&bias)?,
        })
    }

    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let out = input.matmul(&self.weight.t()?)?;
        Ok(out.broadcast_add(self.bias.as_tensor())?)
    }
}

/// Expandable multi-layer perceptron classifier.
///
/// Forward output is log-probabilities (log-softmax applied to the final
/// layer), matching the negative-log-likelihood training loss and the
/// Fisher estimator's sampling of the output distribution.
#[derive(Debug)]
pub struct ClassifierNet {
    layers: Vec<DenseLayer>,
    dims: NetworkDims,
    input_dropout: f32,
    hidden_dropout: f32,
    device: Device,
}

impl ClassifierNet {
    /// Build a freshly initialized network from configuration
    pub fn new(
        config: &crate::config::NetworkConfig,
        device: &Device,
        rng: &mut StdRng,
    ) -> Result<Self> {
        Self::with_dims(
            NetworkDims::from_config(config),
            config.input_dropout,
            config.hidden_dropout,
            device,
            rng,
        )
    }

    /// Build a freshly initialized network with explicit dimensions
    pub(crate) fn with_dims(
        dims: NetworkDims,
        input_dropout: f32,
        hidden_dropout: f32,
        device: &Device,
        rng: &mut StdRng,
    ) -> Result<Self> {
        let mut layers = Vec::new();
        for (index, (in_features, out_features)) in dims.layer_sizes().into_iter().enumerate() {
            layers.push(DenseLayer::init(
                format!("fc{index}"),
                in_features,
                out_features,
                device,
                rng,
            )?);
        }
        Ok(Self {
            layers,
            dims,
            input_dropout,
            hidden_dropout,
            device: device.clone(),
        })
    }

    /// Build a network with all parameters zero.
    ///
    /// Used where every parameter is overwritten immediately afterwards
    /// (historical-size reconstruction) and for the zero growth policy.
    pub(crate) fn zeros(
        dims: NetworkDims,
        input_dropout: f32,
        hidden_dropout: f32,
        device: &Device,
    ) -> Result<Self> {
        let mut layers = Vec::new();
        for (index, (in_features, out_features)) in dims.layer_sizes().into_iter().enumerate() {
            layers.push(DenseLayer::zeros(
                format!("fc{index}"),
                in_features,
                out_features,
                device,
            )?);
        }
        Ok(Self {
            layers,
            dims,
            input_dropout,
            hidden_dropout,
            device: device.clone(),
        })
    }

    /// Forward pass over a `(batch, input)` tensor, returning `(batch,
    /// classes)` log-probabilities. Dropout is applied only when `train` is
    /// set.
    pub fn forward(&self, input: &Tensor, train: bool) -> Result<Tensor> {
        let last = self.layers.len() - 1;
        let mut x = input.clone();
        for (index, layer) in self.layers.iter().enumerate() {
            x = layer.forward(&x)?;
            if index < last {
                x = x.relu()?;
                let prob = if index == 0 {
                    self.input_dropout
                } else {
                    self.hidden_dropout
                };
                if train && prob > 0.0 {
                    x = dropout(&x, prob)?;
                }
            }
        }
        Ok(log_softmax(&x, D::Minus1)?)
    }

    /// Named parameters in manifest order (input to output, weight before
    /// bias). `Var` handles share storage with the network, so holding them
    /// is enough to apply optimizer updates.
    pub fn named_parameters(&self) -> Vec<(String, Var)> {
        let mut params = Vec::with_capacity(self.layers.len() * 2);
        for layer in &self.layers {
            params.push((format!("{}.weight", layer.name), layer.weight.clone()));
            params.push((format!("{}.bias", layer.name), layer.bias.clone()));
        }
        params
    }

    /// Look up a parameter variable by manifest name
    pub fn parameter(&self, name: &str) -> Option<Var> {
        self.named_parameters()
            .into_iter()
            .find(|(n, _)| n == name)
            .map(|(_, var)| var)
    }

    /// Manifest names and shapes
    pub fn parameter_shapes(&self) -> Vec<(String, Vec<usize>)> {
        self.named_parameters()
            .into_iter()
            .map(|(name, var)| {
                let dims = var.as_tensor().dims().to_vec();
                (name, dims)
            })
            .collect()
    }

    /// Detached deep copies of all current parameter values
    pub fn parameter_snapshot(&self) -> Result<NamedTensors> {
        let mut snapshot = NamedTensors::new();
        for (name, var) in self.named_parameters() {
            snapshot.push(name, deep_copy(var.as_tensor())?);
        }
        Ok(snapshot)
    }

    /// Overwrite a parameter's values in place
    pub fn set_parameter(&self, name: &str, values: &Tensor) -> Result<()> {
        let var = self
            .parameter(name)
            .ok_or_else(|| Error::internal(format!("no parameter named `{name}`")))?;
        let expected = var.as_tensor().dims().to_vec();
        if values.dims() != expected.as_slice() {
            return Err(Error::shape_mismatch(name, expected, values.dims()));
        }
        Ok(var.set(values)?)
    }

    /// A second handle onto the same parameter storage.
    ///
    /// The registry hands this out for the task whose recorded size equals
    /// the current capacity: evaluation sees live weights without copying.
    pub fn share_weights(&self) -> Self {
        Self {
            layers: self
                .layers
                .iter()
                .map(|layer| DenseLayer {
                    name: layer.name.clone(),
                    weight: layer.weight.clone(),
                    bias: layer.bias.clone(),
                })
                .collect(),
            dims: self.dims,
            input_dropout: self.input_dropout,
            hidden_dropout: self.hidden_dropout,
            device: self.device.clone(),
        }
    }

    /// Network dimensions
    pub fn dims(&self) -> &NetworkDims {
        &self.dims
    }

    /// Current hidden-layer width
    pub fn hidden_size(&self) -> usize {
        self.dims.hidden
    }

    /// Dropout probabilities `(input, hidden)`
    pub(crate) fn dropout_probs(&self) -> (f32, f32) {
        (self.input_dropout, self.hidden_dropout)
    }

    /// Device the parameters live on
    pub fn device(&self) -> &Device {
        &self.device
    }
}
