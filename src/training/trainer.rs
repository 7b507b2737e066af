//! Continual-learning trainer and expand-and-retrain control flow

use candle_core::{Device, D};
use candle_nn::loss::nll;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, instrument, warn};

use super::data::TaskData;
use super::sgd::SgdOptimizer;
use crate::config::{Config, PenaltyPolicy};
use crate::error::{Error, Result};
use crate::ewc::{ConsolidatedPosterior, EwcPenalty, TaskSnapshot, TaskSnapshotStore};
use crate::expansion::{ExpansionEvent, NetworkExpander, SizeDictionary, TaskModelRegistry};
use crate::fisher::FisherEstimator;
use crate::network::ClassifierNet;
use crate::params::embed_top_left;

/// Test-set result for one task
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaskEvaluation {
    /// Task number
    pub task: usize,
    /// Summed test loss divided by sample count
    pub average_loss: f64,
    /// Accuracy in percent
    pub accuracy: f64,
}

/// Outcome of comparing the newest task's accuracy against the threshold.
///
/// A miss is a signal that capacity must grow, not a failure, so it is a
/// value rather than an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdCheck {
    /// Newest task reached the accuracy threshold
    Met,
    /// Newest task fell short; expansion is warranted
    NotMet,
}

impl ThresholdCheck {
    /// Check the most recently trained task's accuracy
    pub fn from_latest(evaluations: &[TaskEvaluation], threshold: f64) -> Result<Self> {
        let newest = evaluations
            .last()
            .ok_or_else(|| Error::invalid_input("no evaluations to check"))?;
        if newest.accuracy < threshold {
            Ok(Self::NotMet)
        } else {
            Ok(Self::Met)
        }
    }
}

/// One task's trip through the state machine
#[derive(Debug, Clone)]
pub struct TaskRound {
    /// Task number
    pub task: usize,
    /// Expansions performed before the task was accepted
    pub expansions: usize,
    /// Final evaluation over all tasks seen so far
    pub evaluations: Vec<TaskEvaluation>,
}

/// Summary of a full continual-learning run
#[derive(Debug, Clone)]
pub struct ExperimentReport {
    /// Per-task rounds in training order
    pub rounds: Vec<TaskRound>,
    /// Every expansion performed during the run
    pub expansion_events: Vec<ExpansionEvent>,
    /// Hidden width at the end of the run
    pub final_hidden_size: usize,
}

/// Trains a sequence of tasks on one network, consolidating each task with
/// EWC and growing capacity when a new task cannot reach the accuracy
/// threshold.
///
/// State transitions happen only at phase boundaries: parameters change
/// during `train_task`, snapshots and size entries during `finish_task`, and
/// capacity during `maybe_expand`. Evaluation never mutates anything.
pub struct ContinualTrainer {
    config: Config,
    device: Device,
    network: ClassifierNet,
    snapshots: TaskSnapshotStore,
    sizes: SizeDictionary,
    posterior: ConsolidatedPosterior,
    expander: NetworkExpander,
    estimator: FisherEstimator,
    penalty: EwcPenalty,
    expansion_events: Vec<ExpansionEvent>,
    rng: StdRng,
}

impl ContinualTrainer {
    /// Create a trainer with a freshly initialized network
    pub fn new(config: Config, device: Device) -> Result<Self> {
        config.validate()?;

        let mut rng = StdRng::seed_from_u64(config.training.seed);
        let network = ClassifierNet::new(&config.network, &device, &mut rng)?;
        let expander =
            NetworkExpander::new(config.expansion.scale_factor, config.expansion.growth_init)?;
        let penalty = EwcPenalty::new(config.ewc.lambda)?;

        Ok(Self {
            config,
            device,
            network,
            snapshots: TaskSnapshotStore::new(),
            sizes: SizeDictionary::new(),
            posterior: ConsolidatedPosterior::new(),
            expander,
            estimator: FisherEstimator::new(),
            penalty,
            expansion_events: Vec::new(),
            rng,
        })
    }

    /// Train the network on one task's training split.
    ///
    /// Adds the consolidation penalty to every batch loss once at least one
    /// earlier task has completed. Also records the current capacity for the
    /// task, so evaluation can resolve it through the registry immediately
    /// afterwards.
    #[instrument(skip(self, data))]
    pub fn train_task(&mut self, task: usize, data: &TaskData) -> Result<()> {
        if data.train.is_empty() {
            return Err(Error::invalid_input("task has no training batches"));
        }

        let mut optimizer = SgdOptimizer::new(
            self.network.named_parameters(),
            self.config.training.learning_rate,
            self.config.training.momentum,
            self.config.training.weight_decay,
        )?;
        let consolidate = self.config.ewc.enabled && !self.snapshots.is_empty();

        for epoch in 1..=self.config.training.epochs {
            for (batch_index, batch) in data.train.iter().enumerate() {
                let log_probs = self.network.forward(&batch.inputs, true)?;
                let mut loss = nll(&log_probs, &batch.labels)?;

                if consolidate {
                    let penalty = match self.config.ewc.policy {
                        PenaltyPolicy::PerTask => {
                            self.penalty.per_task(&self.network, &self.snapshots)?
                        }
                        PenaltyPolicy::RunningSum => {
                            self.posterior.penalty(&self.network, self.penalty.lambda())?
                        }
                    };
                    loss = (&loss + &penalty)?;
                }

                if batch_index % self.config.training.log_interval == 0 {
                    debug!(
                        task,
                        epoch,
                        batch = batch_index,
                        loss = loss.to_scalar::<f32>()? as f64,
                        consolidated = consolidate,
                        "training step"
                    );
                }

                let gradients = loss.backward()?;
                optimizer.step(&gradients)?;
            }
        }

        self.sizes.record(task, self.network.hidden_size())?;
        info!(
            task,
            hidden = self.network.hidden_size(),
            steps = optimizer.step_count(),
            "task training pass complete"
        );
        Ok(())
    }

    /// Evaluate every task seen so far on its test split.
    ///
    /// Each task is evaluated through a network of the capacity it was
    /// trained at, rebuilt fresh from the current weights, so weights added
    /// by later expansions never influence earlier tasks' results.
    #[instrument(skip(self, tasks))]
    pub fn evaluate(&self, tasks: &[TaskData]) -> Result<Vec<TaskEvaluation>> {
        if tasks.is_empty() {
            return Err(Error::invalid_input("no tasks to evaluate"));
        }

        let models = TaskModelRegistry::models_for_tasks(&self.sizes, &self.network)?;
        let mut evaluations = Vec::with_capacity(tasks.len());
        for (index, data) in tasks.iter().enumerate() {
            let task = index + 1;
            let model = models.get(&task).ok_or_else(|| {
                Error::invalid_input(format!("task {task} has no recorded capacity"))
            })?;
            let evaluation = evaluate_model(model, data, task)?;
            debug!(
                task,
                accuracy = evaluation.accuracy,
                average_loss = evaluation.average_loss,
                "task evaluated"
            );
            evaluations.push(evaluation);
        }
        Ok(evaluations)
    }

    /// Grow the network if the newest task's accuracy fell below `threshold`.
    ///
    /// Returns whether an expansion happened. Trained weights are
    /// transplanted into the enlarged tensors and the running sums are
    /// zero-padded to match; snapshots and size entries of earlier tasks are
    /// left untouched, staying valid through the registry's submatrix
    /// extraction.
    #[instrument(skip(self, evaluations))]
    pub fn maybe_expand(
        &mut self,
        evaluations: &[TaskEvaluation],
        threshold: f64,
    ) -> Result<bool> {
        match ThresholdCheck::from_latest(evaluations, threshold)? {
            ThresholdCheck::Met => Ok(false),
            ThresholdCheck::NotMet => {
                let task = evaluations.last().expect("checked above").task;
                self.expand_capacity(task)?;
                Ok(true)
            }
        }
    }

    /// Estimate the Fisher diagonal, snapshot the trained weights, and fold
    /// the task into the running sums.
    #[instrument(skip(self, data))]
    pub fn finish_task(&mut self, task: usize, data: &TaskData) -> Result<()> {
        let mut sampler = data.fisher_sampler(&mut self.rng)?;
        let fisher = self.estimator.estimate(
            &self.network,
            &mut sampler,
            self.config.ewc.fisher_samples,
            &mut self.rng,
        )?;
        let weights = self.network.parameter_snapshot()?;
        let snapshot = TaskSnapshot::new(task, weights, fisher)?;

        self.posterior.absorb(&snapshot)?;
        self.snapshots.insert(snapshot)?;
        self.sizes.record(task, self.network.hidden_size())?;

        info!(task, hidden = self.network.hidden_size(), "task consolidated");
        Ok(())
    }

    /// Run one task through the full state machine: train, evaluate, and
    /// expand-and-retrain until the threshold is met or the expansion budget
    /// runs out, then consolidate.
    ///
    /// `seen` holds the data for tasks `1..=task`; earlier entries are needed
    /// for the full evaluation pass.
    #[instrument(skip(self, seen))]
    pub fn run_task(&mut self, task: usize, seen: &[TaskData]) -> Result<TaskRound> {
        if seen.len() != task {
            return Err(Error::invalid_input(format!(
                "task {task} needs data for tasks 1..={task}, got {}",
                seen.len()
            )));
        }
        let data = &seen[task - 1];
        let threshold = self.config.expansion.accuracy_threshold;

        self.train_task(task, data)?;
        let mut evaluations = self.evaluate(seen)?;
        let mut expansions = 0;

        loop {
            match ThresholdCheck::from_latest(&evaluations, threshold)? {
                ThresholdCheck::Met => break,
                ThresholdCheck::NotMet if expansions >= self.config.expansion.max_expansions => {
                    warn!(
                        task,
                        expansions,
                        "accuracy threshold still unmet; accepting task at current capacity"
                    );
                    break;
                }
                ThresholdCheck::NotMet => {
                    let expanded = self.maybe_expand(&evaluations, threshold)?;
                    debug_assert!(expanded, "threshold miss must trigger expansion");
                    expansions += 1;
                    self.train_task(task, data)?;
                    evaluations = self.evaluate(seen)?;
                }
            }
        }

        self.finish_task(task, data)?;
        Ok(TaskRound {
            task,
            expansions,
            evaluations,
        })
    }

    /// Run a full task sequence and summarize it
    pub fn run_sequence(&mut self, tasks: &[TaskData]) -> Result<ExperimentReport> {
        if tasks.is_empty() {
            return Err(Error::invalid_input("task sequence is empty"));
        }

        let mut rounds = Vec::with_capacity(tasks.len());
        for index in 0..tasks.len() {
            let task = index + 1;
            let round = self.run_task(task, &tasks[..=index])?;
            rounds.push(round);
        }

        Ok(ExperimentReport {
            rounds,
            expansion_events: self.expansion_events.clone(),
            final_hidden_size: self.network.hidden_size(),
        })
    }

    /// Restore a completed task's recorded weights into the top-left region
    /// of the current (possibly larger) parameter tensors.
    pub fn restore_task_weights(&mut self, task: usize) -> Result<()> {
        let snapshot = self.snapshots.get(task)?;
        for (name, theta_star) in snapshot.optimal_weights().iter() {
            let var = self
                .network
                .parameter(name)
                .ok_or_else(|| Error::internal(format!("no parameter named `{name}`")))?;
            let merged = embed_top_left(var.as_tensor(), theta_star, name)?;
            var.set(&merged)?;
        }
        Ok(())
    }

    /// The current network
    pub fn network(&self) -> &ClassifierNet {
        &self.network
    }

    /// Completed-task snapshots
    pub fn snapshots(&self) -> &TaskSnapshotStore {
        &self.snapshots
    }

    /// Task-to-capacity record
    pub fn sizes(&self) -> &SizeDictionary {
        &self.sizes
    }

    /// Running consolidation sums
    pub fn posterior(&self) -> &ConsolidatedPosterior {
        &self.posterior
    }

    /// Every expansion performed so far
    pub fn expansion_events(&self) -> &[ExpansionEvent] {
        &self.expansion_events
    }

    /// Trainer configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Device the network lives on
    pub fn device(&self) -> &Device {
        &self.device
    }

    fn expand_capacity(&mut self, task: usize) -> Result<()> {
        let grown = self.expander.expand(&self.network, &mut self.rng)?;
        self.posterior.expand_to(&grown.parameter_shapes())?;
        self.expansion_events.push(ExpansionEvent {
            task,
            previous_hidden: self.network.hidden_size(),
            new_hidden: grown.hidden_size(),
        });
        self.network = grown;
        Ok(())
    }
}

fn evaluate_model(model: &ClassifierNet, data: &TaskData, task: usize) -> Result<TaskEvaluation> {
    let mut summed_loss = 0.0f64;
    let mut correct = 0usize;
    let mut total = 0usize;

    for batch in &data.test {
        let log_probs = model.forward(&batch.inputs, false)?;
        let mean_loss = nll(&log_probs, &batch.labels)?.to_scalar::<f32>()? as f64;
        summed_loss += mean_loss * batch.len() as f64;

        let predictions = log_probs.argmax(D::Minus1)?.to_vec1::<u32>()?;
        let labels = batch.labels.to_vec1::<u32>()?;
        correct += predictions
            .iter()
            .zip(labels.iter())
            .filter(|(p, l)| p == l)
            .count();
        total += batch.len();
    }

    if total == 0 {
        return Err(Error::invalid_input(format!("task {task} has no test samples")));
    }

    Ok(TaskEvaluation {
        task,
        average_loss: summed_loss / total as f64,
        accuracy: 100.0 * correct as f64 / total as f64,
    })
}
