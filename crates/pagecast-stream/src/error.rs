//! Error types for the pipe module.

use thiserror::Error;

/// Errors that can occur during pipe operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipeError {
    /// Write attempted after the pipe was ended or the reader went away.
    #[error("stream closed")]
    StreamClosed,
}
