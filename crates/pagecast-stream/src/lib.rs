//! Bounded, high-water-mark gated byte pipe for media chunks.
//!
//! This crate provides the single-producer/single-consumer conduit that
//! decouples the arrival rate of media chunks from the consumption rate of
//! the local reader. Writes are never dropped; once the buffer crosses the
//! high-water mark the writer is told to back off and can await the explicit
//! drain signal.

mod error;
mod pipe;

pub use error::PipeError;
pub use pipe::{pipe, pipe_with_high_water_mark, PipeReader, PipeWriter, WriteOutcome};

/// Default high-water mark, sized for multi-megabyte media bursts.
pub const DEFAULT_HIGH_WATER_MARK: usize = 8 * 1024 * 1024;

/// Result type for pipe operations.
pub type PipeResult<T> = Result<T, PipeError>;
