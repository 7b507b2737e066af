//! Elastic Weight Consolidation
//!
//! After each task completes, the parameter values ("theta star") and the
//! estimated Fisher diagonal are recorded in an append-only snapshot store.
//! During later tasks, a quadratic penalty on drift away from those anchors,
//! weighted by the Fisher importance, is added to the training loss. Two
//! formulations are provided: a per-task sum over stored snapshots and a
//! closed form over running sums that is independent of the task count.

pub mod consolidation;
pub mod penalty;
pub mod snapshot;

pub use consolidation::ConsolidatedPosterior;
pub use penalty::EwcPenalty;
pub use snapshot::{TaskSnapshot, TaskSnapshotStore};
