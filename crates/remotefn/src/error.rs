//! Error types for remote invocation.

use remotefn_core::CoreError;
use thiserror::Error;

use crate::market::MarketError;

/// Errors that can end an invocation.
///
/// Every variant reaches the caller of the wrapped function as a failed call;
/// nothing is retried and no partial result is returned.
#[derive(Debug, Error)]
pub enum InvocationError {
    /// Callable or argument cannot be converted to a transportable form.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A blob could not be turned back into a callable or value.
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Marketplace session could not start, ran out of budget, or timed out.
    #[error("Session error: {0}")]
    Session(String),

    /// An artifact transfer failed inside the committed batch.
    #[error("Transfer error: {0}")]
    Transfer(String),

    /// The remote command or the batch commit failed.
    #[error("Commit error: {0}")]
    Commit(String),

    /// The handler ran and returned an error.
    #[error("Handler '{name}' failed: {message}")]
    Handler { name: String, message: String },

    /// A handler could not be registered.
    #[error("Registration error: {0}")]
    Registration(String),

    /// Named arguments cannot be transported.
    #[error("Keyword arguments are not supported: {}", .0.join(", "))]
    KeywordArguments(Vec<String>),

    /// Local staging I/O failed.
    #[error("Staging error: {0}")]
    Staging(#[from] std::io::Error),

    /// The task lifecycle was driven out of order.
    #[error("Task error: {0}")]
    Task(#[from] CoreError),
}

impl From<MarketError> for InvocationError {
    fn from(err: MarketError) -> Self {
        match err {
            MarketError::Init(_) | MarketError::BudgetExhausted { .. } | MarketError::Closed => {
                Self::Session(err.to_string())
            }
            MarketError::Transfer(_) => Self::Transfer(err.to_string()),
            MarketError::Execution(_) | MarketError::Commit(_) => Self::Commit(err.to_string()),
        }
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, InvocationError>;
