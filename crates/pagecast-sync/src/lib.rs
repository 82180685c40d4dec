//! FIFO ticket-queue mutual exclusion for target selection.
//!
//! This crate provides the gate that serializes the "select and bind a
//! capture target" critical section across all sessions in the process.

mod gate;

pub use gate::{GatePermit, SerializedGate};
