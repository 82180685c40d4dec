//! Common types used across the session and relay layers.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::DEFAULT_TIMESLICE_MS;

/// Opaque identifier of a capture target.
///
/// Assigned once when the session binds its target and immutable thereafter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(String);

impl TargetId {
    /// Create a target id from its raw representation.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TargetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pairing key between a session and its one legitimate peer connection.
///
/// Derived from the session's [`TargetId`], carried out-of-band to the remote
/// capture agent inside the connection URI, and checked against every inbound
/// connection's declared token. Two concurrent sessions never share a token
/// because target selection is serialized and targets are distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionToken(String);

impl ConnectionToken {
    /// Create a token from its raw representation (relay side).
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Derive the token for a capture target (session side).
    pub fn for_target(target: &TargetId) -> Self {
        Self(target.as_str().to_owned())
    }

    /// The raw token value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConnectionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Criteria used to locate the capture target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetCriteria {
    /// Only consider the currently focused surface.
    pub active: bool,

    /// Optional URL pattern the target must match.
    pub url_pattern: Option<String>,
}

impl Default for TargetCriteria {
    fn default() -> Self {
        Self {
            active: true,
            url_pattern: None,
        }
    }
}

/// Capture configuration for a session.
///
/// Validated once via [`StreamOptions::validated`] and immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamOptions {
    /// Capture audio.
    pub audio: bool,

    /// Capture video.
    pub video: bool,

    /// Container MIME type handed to the recorder. Defaulted from the
    /// audio/video flags when absent.
    pub mime_type: Option<String>,

    /// How often the recorder emits a chunk, in milliseconds.
    pub timeslice_ms: u64,

    /// Delay before recording starts, in milliseconds.
    pub start_delay_ms: Option<u64>,

    /// Video bitrate hint in bits per second.
    pub video_bits_per_second: Option<u32>,

    /// Audio bitrate hint in bits per second.
    pub audio_bits_per_second: Option<u32>,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            audio: false,
            video: false,
            mime_type: None,
            timeslice_ms: DEFAULT_TIMESLICE_MS,
            start_delay_ms: None,
            video_bits_per_second: None,
            audio_bits_per_second: None,
        }
    }
}

impl StreamOptions {
    /// Validate the options and fill in defaults.
    ///
    /// At least one of `audio`/`video` must be enabled. A missing `mime_type`
    /// defaults to `video/webm` when video is captured, `audio/webm`
    /// otherwise.
    pub fn validated(mut self) -> Result<Self, OptionsError> {
        if !self.audio && !self.video {
            return Err(OptionsError::NoTracks);
        }

        if self.mime_type.is_none() {
            let default = if self.video {
                "video/webm"
            } else {
                "audio/webm"
            };
            self.mime_type = Some(default.to_owned());
        }

        Ok(self)
    }
}

/// Errors produced by option validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OptionsError {
    /// Neither audio nor video was enabled.
    #[error("audio and/or video must be enabled")]
    NoTracks,
}

/// Payload of the start command issued to the remote capture agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartCapture {
    /// The bound capture target.
    pub target: TargetId,

    /// URI the agent connects back on, token included in the query.
    pub connect_uri: String,

    /// Validated capture options.
    pub options: StreamOptions,
}
