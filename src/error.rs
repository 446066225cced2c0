//! Error types for the tape and the parameter-tree utilities.

use thiserror::Error;

/// Error raised by a [`CustomBackward`](crate::tape::CustomBackward) rule.
pub type BackwardError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by differentiation entry points.
#[derive(Error, Debug)]
pub enum AdError {
    /// A custom reverse rule failed during the reverse sweep.
    #[error("custom backward `{op}` failed: {source}")]
    CustomBackward {
        /// Name reported by the custom rule.
        op: &'static str,
        /// The rule's own error.
        #[source]
        source: BackwardError,
    },

    /// Two lengths that must agree do not.
    #[error("{what}: expected length {expected}, got {got}")]
    ShapeMismatch {
        /// Which quantity was checked.
        what: &'static str,
        expected: usize,
        got: usize,
    },

    /// A group index passed to a group-wise entry point does not exist.
    #[error("argument group {index} out of range for {len} groups")]
    ArgOutOfRange { index: usize, len: usize },
}

/// Errors from flattening and rebuilding parameter trees.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("expected {expected} leaves, got {got}")]
    LeafCount { expected: usize, got: usize },

    #[error("leaf {index}: expected shape {expected:?}, got {got:?}")]
    LeafShape {
        index: usize,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("expected {expected} values, got {got}")]
    ValueCount { expected: usize, got: usize },

    #[error("shape {shape:?} holds {expected} elements, got {got}")]
    TensorSize {
        shape: Vec<usize>,
        expected: usize,
        got: usize,
    },

    #[error("duplicate entry name `{0}`")]
    DuplicateName(String),
}
