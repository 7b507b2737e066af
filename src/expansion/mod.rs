//! Dynamic capacity expansion
//!
//! When a new task cannot reach the accuracy threshold at the current
//! capacity, every hidden dimension is multiplied by a scale factor and the
//! trained weights are transplanted into the top-left region of the enlarged
//! tensors. The size dictionary records the capacity each task was trained
//! at, and the registry reconstructs networks of those historical sizes so
//! earlier tasks are never evaluated through weights that did not exist when
//! they were trained.

pub mod expander;
pub mod registry;

pub use expander::{ExpansionEvent, NetworkExpander};
pub use registry::{SizeDictionary, TaskModelRegistry};
