//! Error types for the event bus.

use thiserror::Error;

/// Result type for bus operations.
pub type BusResult<T> = Result<T, BusError>;

/// Errors that can occur in event bus operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The bus has not been initialized, or has been shut down.
    #[error("event bus is not running")]
    NotRunning,

    /// `initialize` was called on a bus that already left the
    /// uninitialized state.
    #[error("event bus already initialized")]
    AlreadyInitialized,

    /// The configuration is invalid.
    #[error("invalid bus configuration: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },
}

impl BusError {
    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}

/// A failure reported by a subscriber handler.
///
/// Handler failures are isolated: the dispatch worker logs them and moves
/// on to the next handler. They never propagate to the publisher.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    /// Creates a handler error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
