//! Running-sum consolidation across tasks
//!
//! Expanding the per-task penalty shows the aggregate only ever needs three
//! accumulators. Summing `F_t * (theta - W_t)^2` over tasks `t` and
//! rearranging by powers of theta:
//!
//! ```text
//! sum_t F_t*(theta - W_t)^2
//!   = (sum_t F_t) * theta^2  -  2 * (sum_t F_t*W_t) * theta  +  sum_t F_t*W_t^2
//! ```
//!
//! so keeping `sum_F`, `sum_F*W`, and `sum_F*W^2` element-wise makes the
//! penalty computable in closed form for any number of completed tasks. This
//! trades memory (three tensors, independent of task count) for the per-task
//! loop the snapshot-based formulation pays on every training step.

use candle_core::Tensor;
use tracing::{debug, instrument};

use super::snapshot::TaskSnapshot;
use crate::error::{Error, Result};
use crate::network::ClassifierNet;
use crate::params::NamedTensors;

/// Element-wise running sums over all consolidated tasks
#[derive(Debug, Default)]
pub struct ConsolidatedPosterior {
    sum_fisher: NamedTensors,
    sum_fisher_weight: NamedTensors,
    sum_fisher_weight_sq: NamedTensors,
    task_count: usize,
}

impl ConsolidatedPosterior {
    /// Create empty sums
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks absorbed so far
    pub fn task_count(&self) -> usize {
        self.task_count
    }

    /// Whether any task has been absorbed
    pub fn is_empty(&self) -> bool {
        self.task_count == 0
    }

    /// Fold a completed task's snapshot into the running sums.
    ///
    /// The snapshot must match the sums' current shapes exactly: absorption
    /// happens at the capacity the network has when the task completes, and
    /// the sums are expanded alongside the network before any retraining.
    pub fn absorb(&mut self, snapshot: &TaskSnapshot) -> Result<()> {
        if self.task_count == 0 {
            self.sum_fisher = NamedTensors::zeros_like(snapshot.fisher())?;
            self.sum_fisher_weight = NamedTensors::zeros_like(snapshot.fisher())?;
            self.sum_fisher_weight_sq = NamedTensors::zeros_like(snapshot.fisher())?;
        }

        let mut sum_fisher = NamedTensors::new();
        let mut sum_fisher_weight = NamedTensors::new();
        let mut sum_fisher_weight_sq = NamedTensors::new();

        for (name, fisher) in snapshot.fisher().iter() {
            let current = self
                .sum_fisher
                .get(name)
                .ok_or_else(|| Error::internal(format!("no running sum for `{name}`")))?;
            if current.dims() != fisher.dims() {
                return Err(Error::shape_mismatch(name, current.dims(), fisher.dims()));
            }

            let weight = snapshot
                .optimal_weights()
                .get(name)
                .expect("snapshot validated at construction");

            let fw = (fisher * weight)?;
            let fw_sq = (&fw * weight)?;

            sum_fisher.push(name, (current + fisher)?);
            sum_fisher_weight.push(
                name,
                (self.sum_fisher_weight.get(name).expect("initialized above") + fw)?,
            );
            sum_fisher_weight_sq.push(
                name,
                (self.sum_fisher_weight_sq.get(name).expect("initialized above") + fw_sq)?,
            );
        }

        self.sum_fisher = sum_fisher;
        self.sum_fisher_weight = sum_fisher_weight;
        self.sum_fisher_weight_sq = sum_fisher_weight_sq;
        self.task_count += 1;

        debug!(
            task = snapshot.task(),
            consolidated = self.task_count,
            "absorbed task into running sums"
        );
        Ok(())
    }

    /// Aggregate penalty over all absorbed tasks, as a scalar tensor.
    ///
    /// `(lambda / 2) * sum(sum_F * theta^2 - 2 * sum_FW * theta + sum_FW2)`
    /// with theta taken from the live parameter variables, so the result is
    /// differentiable with respect to the network.
    #[instrument(skip(self, network))]
    pub fn penalty(&self, network: &ClassifierNet, lambda: f64) -> Result<Tensor> {
        if self.task_count == 0 {
            return Err(Error::missing_snapshot(
                "running-sum penalty requested before any task was absorbed",
            ));
        }

        let mut total = Tensor::zeros((), candle_core::DType::F32, network.device())?;

        for (name, var) in network.named_parameters() {
            let sum_fisher = self
                .sum_fisher
                .get(&name)
                .ok_or_else(|| Error::internal(format!("no running sum for `{name}`")))?;
            let theta = var.as_tensor();
            if sum_fisher.dims() != theta.dims() {
                return Err(Error::shape_mismatch(&name, theta.dims(), sum_fisher.dims()));
            }
            let sum_fw = self.sum_fisher_weight.get(&name).expect("sums move together");
            let sum_fw_sq = self
                .sum_fisher_weight_sq
                .get(&name)
                .expect("sums move together");

            let quadratic = (sum_fisher * theta.sqr()?)?;
            let linear = ((sum_fw * theta)? * 2.0)?;
            let term = ((quadratic - linear)? + sum_fw_sq)?.sum_all()?;
            total = (&total + &term)?;
        }

        Ok((total * (lambda / 2.0))?)
    }

    /// Zero-pad every running sum to the given shapes.
    ///
    /// Called when the network expands: entries added by growth carry zero
    /// Fisher mass, so the grown weights move freely until a later task is
    /// absorbed at the new capacity.
    pub fn expand_to(&mut self, shapes: &[(String, Vec<usize>)]) -> Result<()> {
        if self.task_count == 0 {
            return Ok(());
        }
        self.sum_fisher = pad_all(&self.sum_fisher, shapes)?;
        self.sum_fisher_weight = pad_all(&self.sum_fisher_weight, shapes)?;
        self.sum_fisher_weight_sq = pad_all(&self.sum_fisher_weight_sq, shapes)?;
        Ok(())
    }

    /// Running Fisher sums, for inspection
    pub fn sum_fisher(&self) -> &NamedTensors {
        &self.sum_fisher
    }
}

fn pad_all(tensors: &NamedTensors, shapes: &[(String, Vec<usize>)]) -> Result<NamedTensors> {
    let mut padded = NamedTensors::new();
    for (name, target) in shapes {
        let tensor = tensors
            .get(name)
            .ok_or_else(|| Error::internal(format!("no running sum for `{name}`")))?;
        if tensor.dims().len() != target.len() {
            return Err(Error::shape_mismatch(name, target.clone(), tensor.dims()));
        }
        let mut grown = tensor.clone();
        for (dim, (&have, &want)) in tensor.dims().iter().zip(target.iter()).enumerate() {
            if have > want {
                return Err(Error::shape_mismatch(name, target.clone(), tensor.dims()));
            }
            if want > have {
                grown = grown.pad_with_zeros(dim, 0, want - have)?;
            }
        }
        padded.push(name.clone(), grown);
    }
    Ok(padded)
}
