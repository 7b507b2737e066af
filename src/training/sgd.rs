//! SGD optimizer with momentum
//!
//! Stochastic gradient descent over the network's named parameter manifest,
//! with optional momentum and weight decay. Updates are applied in place
//! through the parameter variables, so every handle onto the same network
//! sees them immediately.

use std::collections::HashMap;

use candle_core::backprop::GradStore;
use candle_core::{Tensor, Var};

use crate::error::{Error, Result};

/// SGD optimizer with momentum
pub struct SgdOptimizer {
    /// Named parameters being optimized
    params: Vec<(String, Var)>,

    /// Learning rate
    learning_rate: f64,

    /// Momentum coefficient
    momentum: f64,

    /// Weight decay coefficient
    weight_decay: f64,

    /// Current step count
    step_count: usize,

    /// Momentum buffers, keyed by parameter name
    momentum_buffers: HashMap<String, Tensor>,
}

impl SgdOptimizer {
    /// Create a new SGD optimizer over the given parameters
    pub fn new(
        params: Vec<(String, Var)>,
        learning_rate: f64,
        momentum: f64,
        weight_decay: f64,
    ) -> Result<Self> {
        if learning_rate <= 0.0 {
            return Err(Error::invalid_input("learning rate must be > 0"));
        }
        if params.is_empty() {
            return Err(Error::invalid_input("no parameters to optimize"));
        }

        Ok(Self {
            params,
            learning_rate,
            momentum,
            weight_decay,
            step_count: 0,
            momentum_buffers: HashMap::new(),
        })
    }

    /// Optimizer name
    pub fn name(&self) -> &str {
        if self.momentum > 0.0 {
            "sgd_momentum"
        } else {
            "sgd"
        }
    }

    /// Apply one update from computed gradients.
    ///
    /// Parameters without a gradient in `gradients` are skipped.
    pub fn step(&mut self, gradients: &GradStore) -> Result<()> {
        self.step_count += 1;

        for (name, param) in &self.params {
            let Some(grad) = gradients.get(param) else {
                continue;
            };

            // Apply weight decay to the gradient if specified
            let effective_grad = if self.weight_decay > 0.0 {
                let weight_decay_term = (param.as_tensor() * self.weight_decay)?;
                (grad + &weight_decay_term)?
            } else {
                grad.clone()
            };

            let update = if self.momentum > 0.0 {
                // v_t = mu * v_{t-1} + g_t
                let new_momentum = match self.momentum_buffers.get(name) {
                    Some(buffer) => ((buffer * self.momentum)? + &effective_grad)?,
                    None => effective_grad,
                };
                self.momentum_buffers
                    .insert(name.clone(), new_momentum.clone());
                new_momentum
            } else {
                effective_grad
            };

            // theta_t = theta_{t-1} - alpha * update
            let param_update = (&update * self.learning_rate)?;
            param.set(&(param.as_tensor() - &param_update)?)?;
        }

        Ok(())
    }

    /// Get current learning rate
    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    /// Set learning rate
    pub fn set_learning_rate(&mut self, learning_rate: f64) {
        self.learning_rate = learning_rate;
    }

    /// Get parameter count
    pub fn parameter_count(&self) -> usize {
        self.params.len()
    }

    /// Get current step count
    pub fn step_count(&self) -> usize {
        self.step_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{Device, Tensor};

    fn single_param(value: f32) -> (Vec<(String, Var)>, Var) {
        let var =
            Var::from_tensor(&Tensor::from_vec(vec![value], 1, &Device::Cpu).unwrap()).unwrap();
        (vec![("w".to_string(), var.clone())], var)
    }

    #[test]
    fn sgd_optimizer_creation() {
        let (params, _) = single_param(1.0);
        let optimizer = SgdOptimizer::new(params, 0.01, 0.9, 0.0001);

        assert!(optimizer.is_ok());
        let opt = optimizer.unwrap();
        assert_eq!(opt.name(), "sgd_momentum");
        assert_eq!(opt.learning_rate(), 0.01);
        assert_eq!(opt.step_count(), 0);
    }

    #[test]
    fn sgd_without_momentum() {
        let (params, _) = single_param(1.0);
        let optimizer = SgdOptimizer::new(params, 0.01, 0.0, 0.0001).unwrap();
        assert_eq!(optimizer.name(), "sgd");
    }

    #[test]
    fn step_applies_the_update_rule() {
        let (params, var) = single_param(1.0);
        let mut optimizer = SgdOptimizer::new(params, 0.1, 0.0, 0.0).unwrap();

        // loss = w^2, so dloss/dw = 2w = 2.0
        let loss = var.as_tensor().sqr().unwrap().sum_all().unwrap();
        let gradients = loss.backward().unwrap();
        optimizer.step(&gradients).unwrap();

        let value = var.as_tensor().to_vec1::<f32>().unwrap()[0];
        assert!((value - (1.0 - 0.1 * 2.0)).abs() < 1e-6);
        assert_eq!(optimizer.step_count(), 1);
    }

    #[test]
    fn momentum_accumulates_across_steps() {
        let (params, var) = single_param(1.0);
        let mut optimizer = SgdOptimizer::new(params, 0.1, 0.5, 0.0).unwrap();

        // Step 1: w = 1.0, g = 2.0, v = 2.0, w <- 1.0 - 0.2 = 0.8
        let loss = var.as_tensor().sqr().unwrap().sum_all().unwrap();
        optimizer.step(&loss.backward().unwrap()).unwrap();
        let after_first = var.as_tensor().to_vec1::<f32>().unwrap()[0];
        assert!((after_first - 0.8).abs() < 1e-6);

        // Step 2: g = 1.6, v = 0.5 * 2.0 + 1.6 = 2.6, w <- 0.8 - 0.26 = 0.54
        let loss = var.as_tensor().sqr().unwrap().sum_all().unwrap();
        optimizer.step(&loss.backward().unwrap()).unwrap();
        let after_second = var.as_tensor().to_vec1::<f32>().unwrap()[0];
        assert!((after_second - 0.54).abs() < 1e-6);
    }

    #[test]
    fn zero_learning_rate_is_rejected() {
        let (params, _) = single_param(1.0);
        assert!(SgdOptimizer::new(params, 0.0, 0.0, 0.0).is_err());
    }
}
