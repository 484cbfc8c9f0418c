//! Error types for the callback server.

use thiserror::Error;

/// Errors raised while starting the receiver or reading a notification body.
#[derive(Debug, Error)]
pub enum CallbackError {
    /// No port in the requested range could be bound
    #[error("failed to bind callback server: {0}")]
    Bind(String),

    /// The server thread or its runtime could not be started
    #[error("callback server runtime error: {0}")]
    Runtime(String),

    /// A NOTIFY body was not a GENA property set
    #[error("invalid property set: {0}")]
    Parse(String),
}

/// Convenience Result type alias for callback server operations.
pub type Result<T> = std::result::Result<T, CallbackError>;
