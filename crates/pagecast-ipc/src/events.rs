//! Events emitted by a session to its observer.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::state::SessionState;

/// Events that a session can emit while it runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionEvent {
    /// Session state has changed.
    StateChanged {
        /// Previous state.
        previous: SessionState,

        /// Current state.
        current: SessionState,
    },

    /// The capture agent's connection was accepted.
    PeerConnected {
        /// Remote address of the peer.
        remote_addr: SocketAddr,
    },

    /// The capture agent's connection closed.
    PeerClosed,

    /// A relay-level error occurred on the session's connection.
    RelayError {
        /// Error message.
        message: String,
    },
}
