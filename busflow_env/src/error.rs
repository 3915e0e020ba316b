//! Error types for the BusFlow environment abstraction.

use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Feed fetch failed (connection refused, DNS, reset, etc.)
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Feed endpoint answered with a non-OK status
    #[error("Feed returned HTTP {0}")]
    BadStatus(u16),

    /// Payload could not be decoded into a record list
    #[error("Payload error: {0}")]
    PayloadError(String),

    /// Context operation failed
    #[error("Context error: {0}")]
    ContextError(String),

    /// Operation timed out
    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

impl EnvError {
    /// Creates a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::TransportError(msg.into())
    }

    /// Creates a payload error.
    pub fn payload(msg: impl std::fmt::Display) -> Self {
        Self::PayloadError(msg.to_string())
    }
}
