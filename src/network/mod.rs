//! Expandable classifier network
//!
//! A multi-layer perceptron whose hidden width can grow between tasks. Every
//! trainable tensor is a [`candle_core::Var`] registered in an explicit named
//! manifest (`fc0.weight`, `fc0.bias`, ...), ordered input to output; all
//! weight transfer between differently-sized instances is keyed by those
//! names.

pub mod classifier;
pub mod init;

pub use classifier::{ClassifierNet, NetworkDims};
