//! Session state machine types.

use serde::{Deserialize, Serialize};

/// The lifecycle state of a capture session.
///
/// `Stopped` and `Errored` are terminal; a session that reaches either must
/// be replaced by a new one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Session created, nothing started yet.
    #[default]
    Idle,

    /// `start` is binding the target and issuing the start command.
    Initializing,

    /// The remote agent is capturing and the relay is live.
    Streaming,

    /// Capture is paused on the agent side.
    Paused,

    /// Session torn down cleanly.
    Stopped,

    /// Session failed; partial resources have been released.
    Errored {
        /// What went wrong.
        message: String,
    },
}

impl SessionState {
    /// Returns true if the session has not started yet.
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Returns true if the session is streaming.
    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming)
    }

    /// Returns true if the session is paused.
    pub fn is_paused(&self) -> bool {
        matches!(self, Self::Paused)
    }

    /// Returns true if the session reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Errored { .. })
    }

    /// Returns a simple string representation of the state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Initializing => "Initializing",
            Self::Streaming => "Streaming",
            Self::Paused => "Paused",
            Self::Stopped => "Stopped",
            Self::Errored { .. } => "Errored",
        }
    }
}
