//! Training infrastructure for continual learning
//!
//! This module provides the task-by-task training loop, the SGD optimizer,
//! batch/task-data plumbing, and the expand-and-retrain control flow that
//! decides when the network grows.

pub mod data;
pub mod sgd;
pub mod trainer;

// Data re-exports
pub use data::{Batch, SampleSource, SyntheticTasks, TaskData, ValidationSampler};

// Optimizer re-exports
pub use sgd::SgdOptimizer;

// Trainer re-exports
pub use trainer::{
    ContinualTrainer, ExperimentReport, TaskEvaluation, TaskRound, ThresholdCheck,
};
