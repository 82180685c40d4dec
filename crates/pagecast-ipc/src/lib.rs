//! Shared session types and events for pagecast.
//!
//! This crate defines the types exchanged between the session controller,
//! the relay layer, and whatever front end drives them: capture options,
//! the session state machine, and the session event surface.

mod events;
mod state;
mod types;

pub use events::SessionEvent;
pub use state::SessionState;
pub use types::{
    ConnectionToken, OptionsError, StartCapture, StreamOptions, TargetCriteria, TargetId,
};

use crossbeam_channel::{Receiver, Sender};

/// Channel capacity for session events (Session → observer).
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default recorder timeslice in milliseconds.
pub const DEFAULT_TIMESLICE_MS: u64 = 100;

/// Creates a bounded session event channel.
pub fn event_channel() -> (Sender<SessionEvent>, Receiver<SessionEvent>) {
    crossbeam_channel::bounded(EVENT_CHANNEL_CAPACITY)
}
