//! Process-wide relay endpoint and connection handler registry.
//!
//! This crate owns the one listening socket for the whole process lifetime.
//! Inbound connections declare a connection URI in a handshake line; the
//! `targetToken` query parameter is matched against registered per-session
//! handlers, and media then flows as length-prefixed frames to the first
//! handler that claims the connection.

mod endpoint;
mod error;
mod frame;
mod handler;

pub use endpoint::RelayEndpoint;
pub use error::RelayError;
pub use frame::{read_frame, write_frame, write_handshake};
pub use handler::{ConnectionHandler, HandlerId, PeerInfo};

use std::net::SocketAddr;

use pagecast_ipc::ConnectionToken;

/// URI scheme spoken on relay connections.
pub const CONNECT_SCHEME: &str = "pagecast";

/// Query parameter carrying the connection token.
pub const TOKEN_QUERY_PARAM: &str = "targetToken";

/// Upper bound on the handshake line, including the newline.
pub const MAX_HANDSHAKE_BYTES: usize = 2048;

/// Upper bound on a single media frame.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;

/// Build the connection URI a peer declares when connecting back.
pub fn connect_uri(addr: SocketAddr, token: &ConnectionToken) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair(TOKEN_QUERY_PARAM, token.as_str())
        .finish();
    format!("{CONNECT_SCHEME}://{addr}?{query}")
}
