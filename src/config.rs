//! Configuration structures for the elastica system

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main configuration for a continual-learning run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Classifier network configuration
    pub network: NetworkConfig,
    /// Per-task training parameters
    pub training: TrainingParams,
    /// Elastic Weight Consolidation configuration
    pub ewc: EwcConfig,
    /// Capacity-expansion configuration
    pub expansion: ExpansionConfig,
    /// Synthetic task-data configuration
    pub data: DataConfig,
}

impl Config {
    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.network.input_size == 0 {
            return Err(Error::config("Network input size must be > 0"));
        }
        if self.network.hidden_size == 0 {
            return Err(Error::config("Network hidden size must be > 0"));
        }
        if self.network.output_size < 2 {
            return Err(Error::config(
                "Network output size must cover at least two classes",
            ));
        }
        if !(0.0..1.0).contains(&self.network.input_dropout)
            || !(0.0..1.0).contains(&self.network.hidden_dropout)
        {
            return Err(Error::config("Dropout probabilities must be in [0, 1)"));
        }

        if self.training.epochs == 0 {
            return Err(Error::config("Epoch count must be > 0"));
        }
        if self.training.batch_size == 0 {
            return Err(Error::config("Batch size must be > 0"));
        }
        if self.training.learning_rate <= 0.0 {
            return Err(Error::config("Learning rate must be > 0"));
        }

        if self.ewc.lambda < 0.0 {
            return Err(Error::config("EWC lambda must be non-negative"));
        }
        if self.ewc.fisher_samples == 0 {
            return Err(Error::config("Fisher sample count must be > 0"));
        }

        if self.expansion.scale_factor < 1 {
            return Err(Error::config("Expansion scale factor must be >= 1"));
        }
        if !(0.0..=100.0).contains(&self.expansion.accuracy_threshold) {
            return Err(Error::config(
                "Accuracy threshold is a percentage and must be in [0, 100]",
            ));
        }

        if self.data.validation_samples < self.ewc.fisher_samples {
            return Err(Error::config(
                "Validation pool must hold at least fisher_samples points (sampling is without replacement)",
            ));
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            training: TrainingParams::default(),
            ewc: EwcConfig::default(),
            expansion: ExpansionConfig::default(),
            data: DataConfig::default(),
        }
    }
}

/// Classifier network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Number of input features
    pub input_size: usize,
    /// Width of every hidden layer (the dimension expansion scales)
    pub hidden_size: usize,
    /// Number of output classes
    pub output_size: usize,
    /// Count of additional hidden-to-hidden layers beyond the input layer
    pub hidden_layer_count: usize,
    /// Dropout probability after the input layer
    pub input_dropout: f32,
    /// Dropout probability after each additional hidden layer
    pub hidden_dropout: f32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            input_size: 784,
            hidden_size: 30,
            output_size: 10,
            hidden_layer_count: 0,
            input_dropout: 0.0,
            hidden_dropout: 0.0,
        }
    }
}

/// Per-task training parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingParams {
    /// Number of passes over a task's training split
    pub epochs: usize,
    /// Training batch size
    pub batch_size: usize,
    /// SGD learning rate
    pub learning_rate: f64,
    /// SGD momentum coefficient
    pub momentum: f64,
    /// L2 weight-decay coefficient
    pub weight_decay: f64,
    /// Seed for all random number generation
    pub seed: u64,
    /// Batches between training-progress log lines
    pub log_interval: usize,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            epochs: 1,
            batch_size: 64,
            learning_rate: 0.1,
            momentum: 0.0,
            weight_decay: 0.0,
            seed: 1,
            log_interval: 10,
        }
    }
}

/// Elastic Weight Consolidation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EwcConfig {
    /// Whether the consolidation penalty is added to the training loss
    pub enabled: bool,
    /// Fisher multiplier (the lambda of the EWC penalty)
    pub lambda: f64,
    /// Monte-Carlo draws used to estimate the Fisher diagonal
    pub fisher_samples: usize,
    /// Which penalty formulation to use during training
    pub policy: PenaltyPolicy,
}

impl Default for EwcConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lambda: 15.0,
            fisher_samples: 200,
            policy: PenaltyPolicy::PerTask,
        }
    }
}

/// Penalty formulation options
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PenaltyPolicy {
    /// One quadratic term per completed task, summed
    PerTask,
    /// Closed form over running sums, independent of task count
    RunningSum,
}

/// Capacity-expansion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpansionConfig {
    /// Minimum acceptable test accuracy (percent) on the newest task
    pub accuracy_threshold: f64,
    /// Multiplier applied to the hidden size on each expansion
    pub scale_factor: usize,
    /// Expansions allowed per task before accepting it as-is
    pub max_expansions: usize,
    /// How the growth region of expanded tensors is filled
    pub growth_init: GrowthInit,
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self {
            accuracy_threshold: 80.0,
            scale_factor: 2,
            max_expansions: 3,
            growth_init: GrowthInit::Fresh,
        }
    }
}

/// Initialization of entries added by an expansion
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GrowthInit {
    /// The network's standard initializer (truncated normal weights, 0.1 bias)
    Fresh,
    /// Zero fill
    Zero,
}

/// Synthetic task-data configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Samples in each task's training split
    pub train_samples: usize,
    /// Samples in each task's validation split (the Fisher sampling pool)
    pub validation_samples: usize,
    /// Samples in each task's test split
    pub test_samples: usize,
    /// Distance of class centers from the origin
    pub class_separation: f32,
    /// Standard deviation of per-sample noise around a class center
    pub noise_stdev: f32,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            train_samples: 512,
            validation_samples: 200,
            test_samples: 256,
            class_separation: 3.0,
            noise_stdev: 0.3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn zero_hidden_size_is_rejected() {
        let mut config = Config::default();
        config.network.hidden_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn shrinking_scale_factor_is_rejected() {
        let mut config = Config::default();
        config.expansion.scale_factor = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn undersized_validation_pool_is_rejected() {
        let mut config = Config::default();
        config.ewc.fisher_samples = 500;
        config.data.validation_samples = 200;
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_roundtrips_through_json() {
        let config = Config::default();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", serde_json::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = Config::from_file(file.path()).unwrap();
        assert_eq!(loaded.network.hidden_size, config.network.hidden_size);
        assert_eq!(loaded.ewc.policy, config.ewc.policy);
        assert_eq!(loaded.expansion.growth_init, config.expansion.growth_init);
    }
}
