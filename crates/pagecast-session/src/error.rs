//! Error types for the session module.

use thiserror::Error;

use pagecast_ipc::OptionsError;
use pagecast_relay::RelayError;

/// Errors from the remote capture agent command surface.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The agent could not be reached.
    #[error("capture agent unreachable: {0}")]
    Unreachable(String),

    /// The agent refused the command.
    #[error("capture agent rejected the command: {0}")]
    Rejected(String),
}

/// Errors from the target resolver.
#[derive(Debug, Error)]
pub enum TargetError {
    /// No target matched the criteria.
    #[error("capture target not found: {0}")]
    NotFound(String),

    /// The browser driver failed.
    #[error("driver error: {0}")]
    Driver(String),
}

/// Errors that can occur during session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Invalid capture options; surfaced before any side effect.
    #[error(transparent)]
    InvalidOptions(#[from] OptionsError),

    /// Target resolution failed.
    #[error(transparent)]
    Target(#[from] TargetError),

    /// A capture agent command failed.
    #[error(transparent)]
    Agent(#[from] AgentError),

    /// The relay endpoint failed.
    #[error(transparent)]
    Relay(#[from] RelayError),

    /// The operation does not apply to the session's current state.
    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },
}
