//! elastica - continual learning with consolidation and capacity growth
//!
//! This crate trains a sequence of classification tasks one after another on
//! a single network, protecting earlier tasks with Elastic Weight
//! Consolidation and widening the hidden layers (with exact weight
//! transplant) whenever a new task cannot reach its accuracy threshold.

#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]

pub mod config;
pub mod error;
pub mod ewc;
pub mod expansion;
pub mod fisher;
pub mod network;
pub mod params;
pub mod training;

// Re-exports
pub use config::{Config, EwcConfig, ExpansionConfig, GrowthInit, NetworkConfig, PenaltyPolicy};
pub use error::{Error, Result};
pub use ewc::{ConsolidatedPosterior, EwcPenalty, TaskSnapshot, TaskSnapshotStore};
pub use expansion::{ExpansionEvent, NetworkExpander, SizeDictionary, TaskModelRegistry};
pub use fisher::FisherEstimator;
pub use network::ClassifierNet;
pub use params::NamedTensors;
pub use training::{
    Batch, ContinualTrainer, ExperimentReport, SyntheticTasks, TaskData, TaskEvaluation,
    ThresholdCheck,
};

use candle_core::Device;
use tracing::{info, instrument};

/// Main continual-learning system
pub struct ContinualLearning {
    /// Task-by-task trainer and capacity manager
    trainer: ContinualTrainer,
}

impl ContinualLearning {
    /// Create a new continual-learning system with the given configuration
    #[instrument(skip(config))]
    pub fn new(config: Config, device: Device) -> Result<Self> {
        info!("Initializing continual-learning system");
        config.validate()?;

        let trainer = ContinualTrainer::new(config, device)?;
        info!(
            hidden = trainer.network().hidden_size(),
            "Network initialized"
        );

        Ok(Self { trainer })
    }

    /// Train a full task sequence, expanding capacity as needed
    #[instrument(skip(self, tasks))]
    pub fn run_sequence(&mut self, tasks: &[TaskData]) -> Result<ExperimentReport> {
        info!(tasks = tasks.len(), "Starting continual-learning run");

        let report = self.trainer.run_sequence(tasks)?;

        info!(
            final_hidden = report.final_hidden_size,
            expansions = report.expansion_events.len(),
            "Run complete"
        );
        Ok(report)
    }

    /// The underlying trainer
    pub fn trainer(&self) -> &ContinualTrainer {
        &self.trainer
    }

    /// The current network
    pub fn network(&self) -> &ClassifierNet {
        self.trainer.network()
    }

    /// The current configuration
    pub fn config(&self) -> &Config {
        self.trainer.config()
    }
}
