//! Trait seams for the external collaborators.

use async_trait::async_trait;

use pagecast_ipc::{StartCapture, TargetCriteria, TargetId};

use crate::error::{AgentError, TargetError};

/// The remote capture agent's command surface.
///
/// Implemented against whatever mechanism obtains raw media on the remote
/// side (a browser extension, a recorder service). `stop_capture` is assumed
/// idempotent on the agent side: the session may issue it more than once
/// across independent teardown paths.
#[async_trait]
pub trait CaptureAgent: Send + Sync {
    /// Start capturing and connect back on the URI in `command`.
    async fn start_capture(&self, command: StartCapture) -> Result<(), AgentError>;

    /// Pause capture on the given target.
    async fn pause_capture(&self, target: &TargetId) -> Result<(), AgentError>;

    /// Resume capture on the given target.
    async fn resume_capture(&self, target: &TargetId) -> Result<(), AgentError>;

    /// Stop capture on the given target.
    async fn stop_capture(&self, target: &TargetId) -> Result<(), AgentError>;
}

/// Locates the capture target among the driver's UI surfaces.
#[async_trait]
pub trait TargetResolver: Send + Sync {
    /// Bring the surface matching `criteria` to the front.
    async fn focus(&self, criteria: &TargetCriteria) -> Result<(), TargetError>;

    /// Resolve `criteria` to a concrete target.
    async fn locate_target(&self, criteria: &TargetCriteria) -> Result<TargetId, TargetError>;
}
