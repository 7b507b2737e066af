//! Size-indexed model registry

use std::collections::BTreeMap;

use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::network::ClassifierNet;
use crate::params::{deep_copy, narrow_to};

/// Mapping from task number to the hidden width the network had when that
/// task was trained.
///
/// Append-only across tasks; the entry for a task may be updated when that
/// task is retrained after an expansion. Capacity is monotonically
/// non-decreasing in the task order, and insertions that would violate that
/// are rejected.
#[derive(Debug, Clone, Default)]
pub struct SizeDictionary {
    entries: BTreeMap<usize, usize>,
}

impl SizeDictionary {
    /// Create an empty dictionary
    pub fn new() -> Self {
        Self::default()
    }

    /// Record (or update) the hidden width for a task
    pub fn record(&mut self, task: usize, hidden_size: usize) -> Result<()> {
        if task == 0 {
            return Err(Error::invalid_input("task numbers are 1-based"));
        }
        if hidden_size == 0 {
            return Err(Error::invalid_input("hidden size must be > 0"));
        }
        for (&other, &size) in &self.entries {
            if other < task && size > hidden_size {
                return Err(Error::invalid_input(format!(
                    "capacity is monotone: task {task} at width {hidden_size} would undercut task {other} at width {size}"
                )));
            }
            if other > task && size < hidden_size {
                return Err(Error::invalid_input(format!(
                    "capacity is monotone: task {task} at width {hidden_size} would exceed later task {other} at width {size}"
                )));
            }
        }
        if let Some(&previous) = self.entries.get(&task) {
            if hidden_size < previous {
                return Err(Error::invalid_input(format!(
                    "task {task} was trained at width {previous}; capacity never shrinks"
                )));
            }
        }
        self.entries.insert(task, hidden_size);
        Ok(())
    }

    /// Hidden width recorded for a task
    pub fn hidden_size_for(&self, task: usize) -> Option<usize> {
        self.entries.get(&task).copied()
    }

    /// Distinct widths in ascending order
    pub fn distinct_sizes(&self) -> Vec<usize> {
        let mut sizes: Vec<usize> = self.entries.values().copied().collect();
        sizes.sort_unstable();
        sizes.dedup();
        sizes
    }

    /// Iterate over `(task, hidden_size)` entries in task order
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.entries.iter().map(|(&task, &size)| (task, size))
    }

    /// Number of recorded tasks
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether any task has been recorded
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Reconstructs evaluation models at historical capacities.
///
/// A task trained before an expansion must never be evaluated through
/// weights added afterwards, so each such task gets a network of the width
/// it was trained at, filled with the top-left submatrices of the current
/// model's tensors. The mapping is rebuilt fresh before every evaluation
/// pass because the current weights change continuously during training;
/// nothing here is cached.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskModelRegistry;

impl TaskModelRegistry {
    /// Build the task-to-model mapping for an evaluation pass.
    ///
    /// One network is constructed per distinct historical width; tasks
    /// sharing a width share that network through weight-sharing handles.
    /// The width equal to the current model's uses the current model
    /// directly (no copy).
    #[instrument(skip(sizes, current))]
    pub fn models_for_tasks(
        sizes: &SizeDictionary,
        current: &ClassifierNet,
    ) -> Result<BTreeMap<usize, ClassifierNet>> {
        if sizes.is_empty() {
            return Err(Error::invalid_input(
                "no tasks recorded; nothing to build models for",
            ));
        }

        let current_hidden = current.hidden_size();
        let mut by_size: BTreeMap<usize, ClassifierNet> = BTreeMap::new();
        for size in sizes.distinct_sizes() {
            if size > current_hidden {
                return Err(Error::internal(format!(
                    "size dictionary lists width {size} beyond current capacity {current_hidden}"
                )));
            }
            let model = if size == current_hidden {
                current.share_weights()
            } else {
                Self::extract_smaller(current, size)?
            };
            by_size.insert(size, model);
        }

        let mut models = BTreeMap::new();
        for (task, size) in sizes.iter() {
            let model = by_size
                .get(&size)
                .expect("every recorded size was constructed above");
            models.insert(task, model.share_weights());
        }

        debug!(
            tasks = models.len(),
            distinct_sizes = by_size.len(),
            "rebuilt evaluation model registry"
        );
        Ok(models)
    }

    /// Network of width `hidden_size` holding the top-left submatrices of
    /// the current model's parameters.
    fn extract_smaller(current: &ClassifierNet, hidden_size: usize) -> Result<ClassifierNet> {
        let dims = current.dims().with_hidden(hidden_size);
        let (input_dropout, hidden_dropout) = current.dropout_probs();
        let smaller =
            ClassifierNet::zeros(dims, input_dropout, hidden_dropout, current.device())?;

        for (name, small_var) in smaller.named_parameters() {
            let big_var = current
                .parameter(&name)
                .ok_or_else(|| Error::internal(format!("current network lacks `{name}`")))?;
            let restricted =
                narrow_to(big_var.as_tensor(), small_var.as_tensor().dims(), &name)?;
            small_var.set(&deep_copy(&restricted)?)?;
        }
        Ok(smaller)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GrowthInit, NetworkConfig};
    use crate::expansion::NetworkExpander;
    use candle_core::Device;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn test_network(hidden: usize) -> ClassifierNet {
        let config = NetworkConfig {
            input_size: 6,
            hidden_size: hidden,
            output_size: 3,
            hidden_layer_count: 0,
            input_dropout: 0.0,
            hidden_dropout: 0.0,
        };
        let mut rng = StdRng::seed_from_u64(31);
        ClassifierNet::new(&config, &Device::Cpu, &mut rng).unwrap()
    }

    fn flat(tensor: &candle_core::Tensor) -> Vec<f32> {
        tensor.flatten_all().unwrap().to_vec1::<f32>().unwrap()
    }

    #[test]
    fn record_enforces_monotonicity() {
        let mut sizes = SizeDictionary::new();
        sizes.record(1, 20).unwrap();
        sizes.record(2, 40).unwrap();

        // A later task can never be trained at a smaller capacity.
        assert!(sizes.record(3, 20).is_err());
        // An earlier entry can never grow past what followed it.
        assert!(sizes.record(1, 80).is_err());
        // Retraining the newest task after expansion may raise its entry.
        sizes.record(2, 80).unwrap();
        assert_eq!(sizes.hidden_size_for(2), Some(80));
    }

    #[test]
    fn monotonicity_holds_across_an_expansion() {
        let mut sizes = SizeDictionary::new();
        sizes.record(1, 20).unwrap();
        sizes.record(2, 20).unwrap();
        sizes.record(2, 40).unwrap();

        let recorded: Vec<(usize, usize)> = sizes.iter().collect();
        assert_eq!(recorded, vec![(1, 20), (2, 40)]);
        for window in recorded.windows(2) {
            assert!(window[0].1 <= window[1].1);
        }
    }

    #[test]
    fn shrink_is_the_left_inverse_of_expand() {
        let network = test_network(4);
        let before = network.parameter_snapshot().unwrap();

        let expander = NetworkExpander::new(2, GrowthInit::Fresh).unwrap();
        let mut rng = StdRng::seed_from_u64(47);
        let grown = expander.expand(&network, &mut rng).unwrap();

        let mut sizes = SizeDictionary::new();
        sizes.record(1, 4).unwrap();
        sizes.record(2, 8).unwrap();

        let models = TaskModelRegistry::models_for_tasks(&sizes, &grown).unwrap();
        let reconstructed = models.get(&1).unwrap();

        assert_eq!(reconstructed.hidden_size(), 4);
        for (name, var) in reconstructed.named_parameters() {
            assert_eq!(
                flat(var.as_tensor()),
                flat(before.get(&name).unwrap()),
                "reconstructed `{name}` differs from pre-expansion weights"
            );
        }
    }

    #[test]
    fn current_size_shares_live_weights() {
        let network = test_network(4);
        let mut sizes = SizeDictionary::new();
        sizes.record(1, 4).unwrap();

        let models = TaskModelRegistry::models_for_tasks(&sizes, &network).unwrap();
        let model = models.get(&1).unwrap();

        // Mutating the current network must be visible through the registry
        // handle: the current size is used directly, not copied.
        let zeroed = network
            .parameter("fc0.weight")
            .unwrap()
            .as_tensor()
            .zeros_like()
            .unwrap();
        network.set_parameter("fc0.weight", &zeroed).unwrap();

        let seen = flat(model.parameter("fc0.weight").unwrap().as_tensor());
        assert!(seen.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn tasks_sharing_a_width_share_one_model() {
        let network = test_network(8);
        let mut sizes = SizeDictionary::new();
        sizes.record(1, 4).unwrap();
        sizes.record(2, 4).unwrap();
        sizes.record(3, 8).unwrap();

        let models = TaskModelRegistry::models_for_tasks(&sizes, &network).unwrap();
        assert_eq!(models.len(), 3);
        assert_eq!(models.get(&1).unwrap().hidden_size(), 4);
        assert_eq!(models.get(&2).unwrap().hidden_size(), 4);
        assert_eq!(
            flat(models.get(&1).unwrap().parameter("fc0.weight").unwrap().as_tensor()),
            flat(models.get(&2).unwrap().parameter("fc0.weight").unwrap().as_tensor()),
        );
    }

    #[test]
    fn oversized_recorded_width_is_fatal() {
        let network = test_network(4);
        let mut sizes = SizeDictionary::new();
        sizes.record(1, 8).unwrap();

        assert!(TaskModelRegistry::models_for_tasks(&sizes, &network).is_err());
    }
}
