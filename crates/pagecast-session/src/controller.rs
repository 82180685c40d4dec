//! The session controller.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use crossbeam_channel::Sender;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, instrument, warn};

use pagecast_ipc::{
    ConnectionToken, SessionEvent, SessionState, StartCapture, StreamOptions, TargetCriteria,
    TargetId,
};
use pagecast_relay::{
    connect_uri, ConnectionHandler, HandlerId, PeerInfo, RelayEndpoint, RelayError,
};
use pagecast_stream::{pipe, PipeError, PipeReader, PipeWriter, WriteOutcome};
use pagecast_sync::SerializedGate;

use crate::agent::{CaptureAgent, TargetResolver};
use crate::error::SessionError;
use crate::{SessionResult, DEFAULT_RELAY_PORT};

/// Collaborators shared by the sessions of one process.
///
/// Cloning is cheap; concurrent sessions are expected to share one context
/// so that target selection is serialized through the same gate and peer
/// connections arrive on the same endpoint.
#[derive(Clone)]
pub struct SessionContext {
    /// The remote capture agent's command surface.
    pub agent: Arc<dyn CaptureAgent>,

    /// Locates and focuses capture targets.
    pub resolver: Arc<dyn TargetResolver>,

    /// The process-wide relay endpoint.
    pub endpoint: Arc<RelayEndpoint>,

    /// Serializes target selection across sessions.
    pub gate: Arc<SerializedGate>,

    /// Optional sink for session events.
    pub events: Option<Sender<SessionEvent>>,
}

/// One capture lifecycle: target binding, relay wiring, and the
/// start/pause/resume/stop command surface.
///
/// All state transitions on a session are serialized behind an internal
/// operation lock, so callers may invoke its methods from concurrent tasks.
pub struct Session {
    criteria: TargetCriteria,
    resolver: Arc<dyn TargetResolver>,
    gate: Arc<SerializedGate>,
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.inner.state.read().name())
            .finish_non_exhaustive()
    }
}

struct SessionInner {
    options: StreamOptions,
    agent: Arc<dyn CaptureAgent>,
    endpoint: Arc<RelayEndpoint>,
    events: Option<Sender<SessionEvent>>,

    /// Serializes start/pause/resume/stop and connection-close handling.
    op_lock: tokio::sync::Mutex<()>,
    state: RwLock<SessionState>,

    /// Assigned once when the target is bound, never cleared.
    target: RwLock<Option<TargetId>>,

    /// Live relay resources; taken on teardown.
    binding: Mutex<Option<Binding>>,
}

struct Binding {
    target: TargetId,
    writer: Arc<PipeWriter>,
    handler_id: HandlerId,
}

impl Session {
    /// Create a session with validated options.
    ///
    /// Fails with `InvalidOptions` before any other side effect when the
    /// options are unusable.
    pub fn new(
        options: StreamOptions,
        criteria: TargetCriteria,
        context: SessionContext,
    ) -> SessionResult<Self> {
        let options = options.validated()?;

        Ok(Self {
            criteria,
            resolver: context.resolver,
            gate: context.gate,
            inner: Arc::new(SessionInner {
                options,
                agent: context.agent,
                endpoint: context.endpoint,
                events: context.events,
                op_lock: tokio::sync::Mutex::new(()),
                state: RwLock::new(SessionState::Idle),
                target: RwLock::new(None),
                binding: Mutex::new(None),
            }),
        })
    }

    /// The session's current state.
    pub fn state(&self) -> SessionState {
        self.inner.state.read().clone()
    }

    /// The bound capture target, once `start` has selected one.
    pub fn target(&self) -> Option<TargetId> {
        self.inner.target.read().clone()
    }

    /// Start capturing and return the read side of the media pipe.
    ///
    /// Binds the target under the process-wide gate, registers this
    /// session's connection handler, and issues the start command to the
    /// remote agent. Any failure after validation leaves the session
    /// `Errored` with all partial resources released; a failed session is
    /// replaced, not restarted.
    #[instrument(name = "session_start", skip(self))]
    pub async fn start(&self) -> SessionResult<PipeReader> {
        let _op = self.inner.op_lock.lock().await;

        {
            let state = self.inner.state.read();
            if !state.is_idle() {
                return Err(SessionError::InvalidState {
                    operation: "start",
                    state: state.name().to_owned(),
                });
            }
        }
        self.inner.transition_to(SessionState::Initializing);

        let (writer, reader) = pipe();
        let writer = Arc::new(writer);

        match self.initialize(Arc::clone(&writer)).await {
            Ok(()) => {
                self.inner.transition_to(SessionState::Streaming);
                info!("session streaming");
                Ok(reader)
            }
            Err(err) => {
                error!(error = %err, "session start failed");
                self.inner.release_binding();
                writer.end();
                self.inner.transition_to(SessionState::Errored {
                    message: err.to_string(),
                });
                Err(err)
            }
        }
    }

    async fn initialize(&self, writer: Arc<PipeWriter>) -> SessionResult<()> {
        // Target selection is serialized across every session in the
        // process; the permit is released on all exit paths.
        let target = {
            let _permit = self.gate.acquire().await;
            self.resolver.focus(&self.criteria).await?;
            self.resolver.locate_target(&self.criteria).await?
        };
        debug!(%target, "target bound");
        *self.inner.target.write() = Some(target.clone());

        let addr = match self.inner.endpoint.local_addr().await {
            Ok(addr) => addr,
            Err(RelayError::NotConfigured) => {
                self.inner.endpoint.configure(DEFAULT_RELAY_PORT).await?
            }
            Err(err) => return Err(err.into()),
        };

        let token = ConnectionToken::for_target(&target);
        let handler = Arc::new(SessionHandler {
            inner: Arc::clone(&self.inner),
            token: token.clone(),
            writer: Arc::clone(&writer),
        });
        let handler_id = self.inner.endpoint.register(handler);

        *self.inner.binding.lock() = Some(Binding {
            target: target.clone(),
            writer,
            handler_id,
        });

        let command = StartCapture {
            connect_uri: connect_uri(addr, &token),
            target,
            options: self.inner.options.clone(),
        };
        self.inner.agent.start_capture(command).await?;

        Ok(())
    }

    /// Pause capture. Valid only while streaming.
    #[instrument(name = "session_pause", skip(self))]
    pub async fn pause(&self) -> SessionResult<()> {
        let _op = self.inner.op_lock.lock().await;

        {
            let state = self.inner.state.read();
            if !state.is_streaming() {
                return Err(SessionError::InvalidState {
                    operation: "pause",
                    state: state.name().to_owned(),
                });
            }
        }
        let target = self.inner.require_bound("pause")?;

        self.inner.agent.pause_capture(&target).await?;
        self.inner.transition_to(SessionState::Paused);
        Ok(())
    }

    /// Resume a paused capture.
    #[instrument(name = "session_resume", skip(self))]
    pub async fn resume(&self) -> SessionResult<()> {
        let _op = self.inner.op_lock.lock().await;

        {
            let state = self.inner.state.read();
            if !state.is_paused() {
                return Err(SessionError::InvalidState {
                    operation: "resume",
                    state: state.name().to_owned(),
                });
            }
        }
        let target = self.inner.require_bound("resume")?;

        self.inner.agent.resume_capture(&target).await?;
        self.inner.transition_to(SessionState::Streaming);
        Ok(())
    }

    /// Stop the session. Valid from any non-terminal state.
    ///
    /// The stop command to the agent is best-effort: local teardown
    /// completes and the session reaches `Stopped` even when the agent is
    /// gone.
    #[instrument(name = "session_stop", skip(self))]
    pub async fn stop(&self) -> SessionResult<()> {
        let _op = self.inner.op_lock.lock().await;

        {
            let state = self.inner.state.read();
            if state.is_terminal() {
                return Err(SessionError::InvalidState {
                    operation: "stop",
                    state: state.name().to_owned(),
                });
            }
        }

        self.inner.shutdown().await;
        Ok(())
    }
}

impl SessionInner {
    /// Canonical teardown: end the pipe, best-effort stop command,
    /// unregister the handler, transition to `Stopped`. Caller holds the
    /// operation lock.
    async fn shutdown(&self) {
        let binding = self.binding.lock().take();
        if let Some(binding) = binding {
            binding.writer.end();
            if let Err(error) = self.agent.stop_capture(&binding.target).await {
                warn!(%error, "stop command failed");
            }
            self.endpoint.unregister(binding.handler_id);
        }
        self.transition_to(SessionState::Stopped);
    }

    /// Drop the relay resources without issuing agent commands; used when
    /// rolling back a failed start.
    fn release_binding(&self) {
        if let Some(binding) = self.binding.lock().take() {
            self.endpoint.unregister(binding.handler_id);
            binding.writer.end();
        }
    }

    fn require_bound(&self, operation: &'static str) -> SessionResult<TargetId> {
        self.binding
            .lock()
            .as_ref()
            .map(|binding| binding.target.clone())
            .ok_or(SessionError::InvalidState {
                operation,
                state: "unbound".to_owned(),
            })
    }

    fn transition_to(&self, new_state: SessionState) {
        let previous = {
            let mut state = self.state.write();
            std::mem::replace(&mut *state, new_state.clone())
        };

        debug!(
            previous = %previous.name(),
            current = %new_state.name(),
            "state transition"
        );

        self.emit(SessionEvent::StateChanged {
            previous,
            current: new_state,
        });
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(events) = &self.events {
            if let Err(error) = events.try_send(event) {
                warn!(%error, "failed to send session event");
            }
        }
    }
}

/// The session's connection handler: claims the one peer whose declared
/// token matches, forwards its frames into the pipe, and drives teardown
/// when the peer goes away.
struct SessionHandler {
    inner: Arc<SessionInner>,
    token: ConnectionToken,
    writer: Arc<PipeWriter>,
}

#[async_trait]
impl ConnectionHandler for SessionHandler {
    fn accepts(&self, peer: &PeerInfo) -> bool {
        peer.token.as_ref() == Some(&self.token)
    }

    fn on_open(&self, peer: &PeerInfo) {
        info!(remote_addr = %peer.remote_addr, "capture agent connected");
        self.inner.emit(SessionEvent::PeerConnected {
            remote_addr: peer.remote_addr,
        });
    }

    async fn on_message(&self, data: Bytes) {
        match self.writer.write(data) {
            Ok(WriteOutcome::Accepted) => {}
            // Above the high-water mark: hold the connection's read loop
            // until the consumer catches up. Nothing is dropped.
            Ok(WriteOutcome::Backpressured) => self.writer.drain().await,
            Err(PipeError::StreamClosed) => {
                debug!("chunk arrived after stream end, dropping");
            }
        }
    }

    fn on_error(&self, error: &std::io::Error) {
        warn!(%error, "relay connection error");
        self.inner.emit(SessionEvent::RelayError {
            message: error.to_string(),
        });
    }

    async fn on_close(&self) {
        let _op = self.inner.op_lock.lock().await;

        // The writable side ends with the connection regardless of session
        // state; ending twice is a no-op.
        self.writer.end();

        let terminal = self.inner.state.read().is_terminal();
        if terminal {
            debug!("peer closed after teardown, nothing to do");
            return;
        }

        info!("capture agent disconnected, stopping session");
        self.inner.emit(SessionEvent::PeerClosed);
        self.inner.shutdown().await;
    }
}
