//! Connection handler types.

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use pagecast_ipc::ConnectionToken;

use crate::TOKEN_QUERY_PARAM;

/// Identity of an inbound peer, as declared in its handshake line.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    /// Remote address of the TCP connection.
    pub remote_addr: SocketAddr,

    /// The connection URI the peer declared.
    pub declared_uri: Url,

    /// Token extracted from the URI's query, if any.
    pub token: Option<ConnectionToken>,
}

impl PeerInfo {
    pub(crate) fn from_handshake(line: &str, remote_addr: SocketAddr) -> Option<Self> {
        let declared_uri = Url::parse(line.trim()).ok()?;
        let token = declared_uri
            .query_pairs()
            .find(|(key, _)| key == TOKEN_QUERY_PARAM)
            .map(|(_, value)| ConnectionToken::new(value.into_owned()));

        Some(Self {
            remote_addr,
            declared_uri,
            token,
        })
    }
}

/// Per-session connection callbacks.
///
/// Every inbound connection is offered to each registered handler's
/// [`accepts`](Self::accepts) predicate; the first match claims the
/// connection exclusively for its lifetime, and a claimed handler is never
/// offered another connection. Connections no handler claims are dropped
/// without error.
#[async_trait]
pub trait ConnectionHandler: Send + Sync {
    /// Whether this handler claims the given peer.
    fn accepts(&self, peer: &PeerInfo) -> bool;

    /// Called once when a connection is claimed.
    fn on_open(&self, _peer: &PeerInfo) {}

    /// Called for every media frame arriving on the claimed connection.
    async fn on_message(&self, data: Bytes);

    /// Called when the claimed connection fails; `on_close` follows.
    fn on_error(&self, _error: &io::Error) {}

    /// Called once when the claimed connection closes.
    async fn on_close(&self);
}

/// Identifier of a registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(pub(crate) u64);
