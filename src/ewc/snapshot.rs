//! Per-task parameter snapshots

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::{Error, Result};
use crate::params::NamedTensors;

/// Post-training state recorded for one completed task.
///
/// Immutable once created: the optimal weights are the anchor the EWC penalty
/// measures drift from, and the Fisher diagonal weights that drift per
/// parameter entry. Both carry the shapes the network had when the task
/// finished training; they are never resized afterwards, even when the
/// network grows.
#[derive(Debug, Clone)]
pub struct TaskSnapshot {
    task: usize,
    optimal_weights: NamedTensors,
    fisher: NamedTensors,
}

impl TaskSnapshot {
    /// Create a snapshot, validating that weights and Fisher diagonals agree
    /// on names and shapes.
    pub fn new(task: usize, optimal_weights: NamedTensors, fisher: NamedTensors) -> Result<Self> {
        if task == 0 {
            return Err(Error::invalid_input("task numbers are 1-based"));
        }
        if optimal_weights.is_empty() {
            return Err(Error::invalid_input("snapshot has no parameters"));
        }
        if optimal_weights.names() != fisher.names() {
            return Err(Error::invalid_input(
                "snapshot weights and Fisher diagonals disagree on parameter names",
            ));
        }
        for (name, weights) in optimal_weights.iter() {
            let diagonal = fisher.get(name).expect("names checked above");
            if diagonal.dims() != weights.dims() {
                return Err(Error::shape_mismatch(name, weights.dims(), diagonal.dims()));
            }
        }
        Ok(Self {
            task,
            optimal_weights,
            fisher,
        })
    }

    /// Task this snapshot belongs to
    pub fn task(&self) -> usize {
        self.task
    }

    /// Parameter values recorded when the task finished training
    pub fn optimal_weights(&self) -> &NamedTensors {
        &self.optimal_weights
    }

    /// Fisher diagonal recorded for the task
    pub fn fisher(&self) -> &NamedTensors {
        &self.fisher
    }
}

/// Append-only store of task snapshots, keyed by task number.
///
/// A task completes exactly once, so inserting a duplicate key is an error
/// rather than an overwrite. This replaces implicit "optimal weights are
/// whatever was saved last" state with an explicit record per task.
#[derive(Debug, Default)]
pub struct TaskSnapshotStore {
    snapshots: BTreeMap<usize, TaskSnapshot>,
}

impl TaskSnapshotStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed task's snapshot
    pub fn insert(&mut self, snapshot: TaskSnapshot) -> Result<()> {
        let task = snapshot.task();
        if self.snapshots.contains_key(&task) {
            return Err(Error::DuplicateSnapshot(task));
        }
        debug!(task, parameters = snapshot.optimal_weights().len(), "recorded task snapshot");
        self.snapshots.insert(task, snapshot);
        Ok(())
    }

    /// Snapshot for a specific task
    pub fn get(&self, task: usize) -> Result<&TaskSnapshot> {
        self.snapshots
            .get(&task)
            .ok_or_else(|| Error::missing_snapshot(format!("task {task} has not completed")))
    }

    /// Snapshot of the most recently completed task
    pub fn latest(&self) -> Option<&TaskSnapshot> {
        self.snapshots.values().next_back()
    }

    /// Iterate over snapshots in task order
    pub fn iter(&self) -> impl Iterator<Item = &TaskSnapshot> {
        self.snapshots.values()
    }

    /// Number of completed tasks
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Whether any task has completed
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device, Tensor};

    fn named(shape: (usize, usize)) -> NamedTensors {
        let mut tensors = NamedTensors::new();
        tensors.push(
            "fc0.weight",
            Tensor::zeros(shape, DType::F32, &Device::Cpu).unwrap(),
        );
        tensors
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let mut store = TaskSnapshotStore::new();
        store
            .insert(TaskSnapshot::new(1, named((2, 2)), named((2, 2))).unwrap())
            .unwrap();

        let err = store
            .insert(TaskSnapshot::new(1, named((2, 2)), named((2, 2))).unwrap())
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateSnapshot(1)));
    }

    #[test]
    fn missing_task_is_an_error() {
        let store = TaskSnapshotStore::new();
        assert!(matches!(store.get(3), Err(Error::MissingSnapshot(_))));
    }

    #[test]
    fn mismatched_fisher_shape_is_rejected() {
        let err = TaskSnapshot::new(1, named((2, 2)), named((3, 2))).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn latest_returns_highest_task() {
        let mut store = TaskSnapshotStore::new();
        store
            .insert(TaskSnapshot::new(2, named((2, 2)), named((2, 2))).unwrap())
            .unwrap();
        store
            .insert(TaskSnapshot::new(1, named((2, 2)), named((2, 2))).unwrap())
            .unwrap();

        assert_eq!(store.latest().unwrap().task(), 2);
        assert_eq!(store.len(), 2);
    }
}
