//! Error types for the relay module.

use thiserror::Error;

/// Errors that can occur during relay operations.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The requested port could not be bound.
    #[error("port {port} unavailable: {source}")]
    PortUnavailable {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// No listener has been bound yet.
    #[error("relay endpoint not configured")]
    NotConfigured,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
