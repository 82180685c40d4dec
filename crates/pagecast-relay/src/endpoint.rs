//! The process-wide relay endpoint.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::error::RelayError;
use crate::frame::read_frame;
use crate::handler::{ConnectionHandler, HandlerId, PeerInfo};
use crate::{RelayResult, MAX_HANDSHAKE_BYTES};

/// The one listening socket for the process lifetime.
///
/// Lazily bound on the first [`configure`](Self::configure) call and reused
/// thereafter. An injectable component with an explicit lifecycle rather
/// than an implicit global: tests can run several independent endpoints in
/// one process.
#[derive(Default)]
pub struct RelayEndpoint {
    listener: tokio::sync::Mutex<Option<ActiveListener>>,
    registry: Arc<HandlerRegistry>,
}

struct ActiveListener {
    addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl RelayEndpoint {
    /// Create an unconfigured endpoint.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the listener on `port`.
    ///
    /// Calling again with the already-bound port is a no-op returning the
    /// existing address. A different port binds the new listener and then
    /// closes the prior one, so at most one listener exists at any time.
    /// Port 0 always binds a fresh OS-assigned port.
    ///
    /// If the bind fails, `PortUnavailable` is returned and the prior
    /// listener (if any) keeps serving.
    #[instrument(name = "relay_configure", skip(self))]
    pub async fn configure(&self, port: u16) -> RelayResult<SocketAddr> {
        let mut slot = self.listener.lock().await;

        if let Some(active) = slot.as_ref() {
            if port != 0 && active.addr.port() == port {
                debug!(addr = %active.addr, "already bound, reusing listener");
                return Ok(active.addr);
            }
        }

        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .map_err(|source| RelayError::PortUnavailable { port, source })?;
        let addr = listener.local_addr()?;

        if let Some(prev) = slot.take() {
            info!(previous = %prev.addr, "replacing relay listener");
            prev.accept_task.abort();
        }

        let registry = Arc::clone(&self.registry);
        let accept_task = tokio::spawn(accept_loop(listener, registry));
        *slot = Some(ActiveListener { addr, accept_task });

        info!(%addr, "relay listener bound");
        Ok(addr)
    }

    /// Address of the bound listener, or `NotConfigured`.
    pub async fn local_addr(&self) -> RelayResult<SocketAddr> {
        self.listener
            .lock()
            .await
            .as_ref()
            .map(|active| active.addr)
            .ok_or(RelayError::NotConfigured)
    }

    /// Port of the bound listener, or `NotConfigured`.
    pub async fn current_port(&self) -> RelayResult<u16> {
        Ok(self.local_addr().await?.port())
    }

    /// Attach a per-session handler to the connection registry.
    pub fn register(&self, handler: Arc<dyn ConnectionHandler>) -> HandlerId {
        self.registry.register(handler)
    }

    /// Detach a handler. Returns false if it was already removed.
    pub fn unregister(&self, id: HandlerId) -> bool {
        self.registry.unregister(id)
    }

    /// Close the listener, if any. Registered handlers are kept; their
    /// owning sessions remove them. Idempotent.
    #[instrument(name = "relay_teardown", skip(self))]
    pub async fn teardown(&self) {
        if let Some(active) = self.listener.lock().await.take() {
            info!(addr = %active.addr, "relay listener closed");
            active.accept_task.abort();
        }
    }
}

impl Drop for RelayEndpoint {
    fn drop(&mut self) {
        if let Some(active) = self.listener.get_mut().take() {
            active.accept_task.abort();
        }
    }
}

#[derive(Default)]
struct HandlerRegistry {
    next_id: AtomicU64,
    entries: RwLock<Vec<Arc<HandlerEntry>>>,
}

struct HandlerEntry {
    id: HandlerId,
    claimed: AtomicBool,
    handler: Arc<dyn ConnectionHandler>,
}

impl HandlerRegistry {
    fn register(&self, handler: Arc<dyn ConnectionHandler>) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.write().push(Arc::new(HandlerEntry {
            id,
            claimed: AtomicBool::new(false),
            handler,
        }));
        id
    }

    fn unregister(&self, id: HandlerId) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        entries.len() != before
    }

    /// Offer a peer to every unclaimed handler in registration order; the
    /// first whose predicate matches claims it.
    fn claim(&self, peer: &PeerInfo) -> Option<Arc<HandlerEntry>> {
        let entries = self.entries.read();
        for entry in entries.iter() {
            if entry.claimed.load(Ordering::Acquire) {
                continue;
            }
            if !entry.handler.accepts(peer) {
                continue;
            }
            if entry
                .claimed
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(Arc::clone(entry));
            }
        }
        None
    }
}

async fn accept_loop(listener: TcpListener, registry: Arc<HandlerRegistry>) {
    loop {
        match listener.accept().await {
            Ok((stream, remote_addr)) => {
                debug!(%remote_addr, "inbound connection");
                let registry = Arc::clone(&registry);
                tokio::spawn(serve_connection(stream, remote_addr, registry));
            }
            Err(error) => {
                warn!(%error, "accept failed");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

/// Drive one inbound connection: handshake, claim, then relay frames until
/// the peer goes away. Errors here never affect the listener or other
/// connections.
async fn serve_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    registry: Arc<HandlerRegistry>,
) {
    let mut reader = BufReader::new(stream);

    let mut line = String::new();
    let mut limited = (&mut reader).take(MAX_HANDSHAKE_BYTES as u64);
    match limited.read_line(&mut line).await {
        Ok(0) => {
            debug!(%remote_addr, "connection closed before handshake");
            return;
        }
        Ok(_) => {}
        Err(error) => {
            debug!(%remote_addr, %error, "handshake read failed");
            return;
        }
    }

    let Some(peer) = PeerInfo::from_handshake(&line, remote_addr) else {
        debug!(%remote_addr, "malformed handshake, dropping connection");
        return;
    };

    let Some(entry) = registry.claim(&peer) else {
        debug!(%remote_addr, "no handler claimed connection, dropping");
        return;
    };

    debug!(%remote_addr, "connection claimed");
    entry.handler.on_open(&peer);

    loop {
        match read_frame(&mut reader).await {
            Ok(Some(payload)) => entry.handler.on_message(payload).await,
            Ok(None) => {
                debug!(%remote_addr, "peer closed connection");
                break;
            }
            Err(error) => {
                warn!(%remote_addr, %error, "connection error");
                entry.handler.on_error(&error);
                break;
            }
        }
    }

    entry.handler.on_close().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use bytes::Bytes;
    use parking_lot::Mutex;

    use pagecast_ipc::ConnectionToken;

    use crate::frame::{write_frame, write_handshake};
    use crate::connect_uri;

    struct RecordingHandler {
        token: ConnectionToken,
        messages: Mutex<Vec<Bytes>>,
        opens: AtomicUsize,
        closes: AtomicUsize,
    }

    impl RecordingHandler {
        fn new(token: &str) -> Arc<Self> {
            Arc::new(Self {
                token: ConnectionToken::new(token),
                messages: Mutex::new(Vec::new()),
                opens: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ConnectionHandler for RecordingHandler {
        fn accepts(&self, peer: &PeerInfo) -> bool {
            peer.token.as_ref() == Some(&self.token)
        }

        fn on_open(&self, _peer: &PeerInfo) {
            self.opens.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_message(&self, data: Bytes) {
            self.messages.lock().push(data);
        }

        async fn on_close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn eventually(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not met in time");
    }

    async fn connect_peer(addr: SocketAddr, declared_uri: &str) -> TcpStream {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        write_handshake(&mut stream, declared_uri).await.unwrap();
        stream
    }

    #[tokio::test]
    async fn test_configure_reports_bound_port() {
        let endpoint = RelayEndpoint::new();

        let addr = endpoint.configure(0).await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(endpoint.current_port().await.unwrap(), addr.port());
    }

    #[tokio::test]
    async fn test_unconfigured_endpoint_has_no_port() {
        let endpoint = RelayEndpoint::new();
        assert!(matches!(
            endpoint.current_port().await,
            Err(RelayError::NotConfigured)
        ));
    }

    #[tokio::test]
    async fn test_configure_same_port_is_a_noop() {
        let endpoint = RelayEndpoint::new();

        let first = endpoint.configure(0).await.unwrap();
        let second = endpoint.configure(first.port()).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_configure_new_port_replaces_listener() {
        let endpoint = RelayEndpoint::new();

        let first = endpoint.configure(0).await.unwrap();
        let second = endpoint.configure(0).await.unwrap();
        assert_ne!(first.port(), second.port());

        // The replacement listener accepts connections.
        let _peer = TcpStream::connect(second).await.unwrap();

        // The prior listener is closed shortly after the swap.
        eventually(|| {
            std::net::TcpStream::connect_timeout(&first, Duration::from_millis(20)).is_err()
        })
        .await;
    }

    #[tokio::test]
    async fn test_port_unavailable_keeps_prior_state() {
        let endpoint = RelayEndpoint::new();
        let first = endpoint.configure(0).await.unwrap();

        // Occupy another port out from under the endpoint.
        let occupied = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let taken = occupied.local_addr().unwrap().port();

        let err = endpoint.configure(taken).await.unwrap_err();
        assert!(matches!(err, RelayError::PortUnavailable { port, .. } if port == taken));

        // Prior listener untouched.
        assert_eq!(endpoint.local_addr().await.unwrap(), first);
        let _peer = TcpStream::connect(first).await.unwrap();
    }

    #[tokio::test]
    async fn test_matching_token_forwards_frames() {
        let endpoint = RelayEndpoint::new();
        let addr = endpoint.configure(0).await.unwrap();

        let handler = RecordingHandler::new("tab-1");
        endpoint.register(handler.clone());

        let uri = connect_uri(addr, &ConnectionToken::new("tab-1"));
        let mut peer = connect_peer(addr, &uri).await;
        write_frame(&mut peer, b"media chunk").await.unwrap();

        eventually(|| handler.messages.lock().len() == 1).await;
        assert_eq!(handler.messages.lock()[0].as_ref(), b"media chunk");
        assert_eq!(handler.opens.load(Ordering::SeqCst), 1);

        drop(peer);
        eventually(|| handler.closes.load(Ordering::SeqCst) == 1).await;
    }

    #[tokio::test]
    async fn test_wrong_or_missing_token_never_reaches_handler() {
        let endpoint = RelayEndpoint::new();
        let addr = endpoint.configure(0).await.unwrap();

        let handler = RecordingHandler::new("tab-1");
        endpoint.register(handler.clone());

        let wrong = connect_uri(addr, &ConnectionToken::new("tab-2"));
        let mut peer = connect_peer(addr, &wrong).await;
        let _ = write_frame(&mut peer, b"intruder").await;
        drop(peer);

        let missing = format!("{}://{}", crate::CONNECT_SCHEME, addr);
        let mut peer = connect_peer(addr, &missing).await;
        let _ = write_frame(&mut peer, b"anonymous").await;
        drop(peer);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(handler.messages.lock().is_empty());
        assert_eq!(handler.opens.load(Ordering::SeqCst), 0);
        assert_eq!(handler.closes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_claimed_handler_takes_a_single_peer() {
        let endpoint = RelayEndpoint::new();
        let addr = endpoint.configure(0).await.unwrap();

        let handler = RecordingHandler::new("tab-1");
        endpoint.register(handler.clone());

        let uri = connect_uri(addr, &ConnectionToken::new("tab-1"));
        let mut first = connect_peer(addr, &uri).await;
        write_frame(&mut first, b"from first").await.unwrap();
        eventually(|| handler.opens.load(Ordering::SeqCst) == 1).await;

        // Same token, second connection: the handler is already claimed.
        let mut second = connect_peer(addr, &uri).await;
        let _ = write_frame(&mut second, b"from second").await;
        drop(second);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handler.opens.load(Ordering::SeqCst), 1);
        assert_eq!(handler.messages.lock().len(), 1);
        assert_eq!(handler.messages.lock()[0].as_ref(), b"from first");
    }

    #[tokio::test]
    async fn test_unregistered_handler_is_not_offered_connections() {
        let endpoint = RelayEndpoint::new();
        let addr = endpoint.configure(0).await.unwrap();

        let handler = RecordingHandler::new("tab-1");
        let id = endpoint.register(handler.clone());
        assert!(endpoint.unregister(id));
        assert!(!endpoint.unregister(id));

        let uri = connect_uri(addr, &ConnectionToken::new("tab-1"));
        let mut peer = connect_peer(addr, &uri).await;
        let _ = write_frame(&mut peer, b"too late").await;
        drop(peer);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(handler.messages.lock().is_empty());
    }

    #[tokio::test]
    async fn test_teardown_closes_listener() {
        let endpoint = RelayEndpoint::new();
        let addr = endpoint.configure(0).await.unwrap();

        endpoint.teardown().await;
        endpoint.teardown().await;

        assert!(matches!(
            endpoint.current_port().await,
            Err(RelayError::NotConfigured)
        ));
        eventually(|| {
            std::net::TcpStream::connect_timeout(&addr, Duration::from_millis(20)).is_err()
        })
        .await;
    }
}
