//! Core domain errors.

use thiserror::Error;

/// Core domain errors for remotefn.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Invalid task state transition.
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    /// Invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
