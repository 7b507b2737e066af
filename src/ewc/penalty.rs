//! Per-task EWC penalty

use candle_core::Tensor;
use tracing::{debug, instrument};

use super::snapshot::TaskSnapshotStore;
use crate::error::{Error, Result};
use crate::network::ClassifierNet;
use crate::params::narrow_to;

/// Quadratic consolidation penalty summed over completed tasks.
///
/// For each task with snapshot `(theta_star, fisher)` the contribution is
/// `(lambda / 2) * sum(fisher * (theta - theta_star)^2)` over all parameter
/// entries. Parameters that grew since a snapshot are narrowed to the
/// snapshot's shape first: entries that did not exist when the constraint was
/// formed contribute nothing to that task's term and move freely.
///
/// The penalty is a pure function of the current parameters and the stored
/// snapshots, recomputed on every call; nothing accumulates across calls.
#[derive(Debug, Clone, Copy)]
pub struct EwcPenalty {
    lambda: f64,
}

impl EwcPenalty {
    /// Create a penalty with the given Fisher multiplier
    pub fn new(lambda: f64) -> Result<Self> {
        if lambda < 0.0 {
            return Err(Error::invalid_input("EWC lambda must be non-negative"));
        }
        Ok(Self { lambda })
    }

    /// Fisher multiplier
    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    /// Penalty over all completed tasks, as a scalar tensor.
    ///
    /// The result stays in the autograd graph of the network's parameters
    /// (the restriction uses `narrow`, never a detached copy), so adding it
    /// to the task loss lets gradients flow through the penalty in the
    /// backward pass.
    #[instrument(skip(self, network, store))]
    pub fn per_task(&self, network: &ClassifierNet, store: &TaskSnapshotStore) -> Result<Tensor> {
        if store.is_empty() {
            return Err(Error::missing_snapshot(
                "EWC penalty requested before any task completed",
            ));
        }

        let parameters = network.named_parameters();
        let mut total = Tensor::zeros((), candle_core::DType::F32, network.device())?;

        for snapshot in store.iter() {
            for (name, theta_star) in snapshot.optimal_weights().iter() {
                let (_, var) = parameters
                    .iter()
                    .find(|(n, _)| n == name)
                    .ok_or_else(|| Error::internal(format!("no parameter named `{name}`")))?;

                let restricted = narrow_to(var.as_tensor(), theta_star.dims(), name)?;
                let fisher = snapshot
                    .fisher()
                    .get(name)
                    .expect("snapshot validated at construction");

                let drift = (&restricted - theta_star)?;
                let term = (fisher * drift.sqr()?)?.sum_all()?;
                total = (&total + &term)?;
            }
            debug!(task = snapshot.task(), "added task term to EWC penalty");
        }

        Ok((total * (self.lambda / 2.0))?)
    }
}
