//! Local and remote media handles
//!
//! The call controller only needs acquire/release semantics from the capture
//! side. Tracks are reference-counted handles so the UI layer can hold a
//! read-only view while the call session keeps ownership of the lifecycle.

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Kind of media carried by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Audio track
    Audio,
    /// Video track
    Video,
}

/// Which capture devices to request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConstraints {
    /// Request a microphone track (default: true)
    pub audio: bool,
    /// Request a camera track (default: true)
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

/// A single media track
///
/// `stop()` must be idempotent: stopping an already-stopped track is a no-op.
pub trait MediaTrack: Send + Sync + fmt::Debug {
    /// Track identifier
    fn id(&self) -> &str;

    /// Track kind
    fn kind(&self) -> MediaKind;

    /// Stop the track and release the underlying device
    fn stop(&self);

    /// Whether the track has been stopped
    fn is_stopped(&self) -> bool;

    /// Access the concrete track type (used by transports to unwrap their own tracks)
    fn as_any(&self) -> &dyn Any;
}

/// Local capture source
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Acquire local capture tracks matching `constraints`
    ///
    /// Returns `Error::MediaUnavailable` when the device is denied or absent.
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<LocalMedia>;
}

/// Locally captured media stream
///
/// Owns its tracks: every track is stopped when the stream is released or
/// dropped.
pub struct LocalMedia {
    stream_id: String,
    tracks: Vec<Arc<dyn MediaTrack>>,
}

impl LocalMedia {
    /// Create a local stream from captured tracks
    pub fn new(stream_id: impl Into<String>, tracks: Vec<Arc<dyn MediaTrack>>) -> Self {
        Self {
            stream_id: stream_id.into(),
            tracks,
        }
    }

    /// Stream identifier
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Tracks in capture order
    pub fn tracks(&self) -> &[Arc<dyn MediaTrack>] {
        &self.tracks
    }

    /// Whether the stream has no tracks
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Read-only view of this stream for observers
    pub fn view(&self) -> MediaView {
        MediaView {
            stream_id: self.stream_id.clone(),
            tracks: self.tracks.clone(),
        }
    }

    /// Stop every track and drop the stream
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for LocalMedia {
    fn drop(&mut self) {
        for track in self.tracks.drain(..) {
            track.stop();
        }
        debug!("Released local media stream {}", self.stream_id);
    }
}

impl fmt::Debug for LocalMedia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalMedia")
            .field("stream_id", &self.stream_id)
            .field("tracks", &self.tracks.len())
            .finish()
    }
}

/// Read-only stream view handed to observers (local preview or remote media)
#[derive(Debug, Clone)]
pub struct MediaView {
    /// Stream identifier
    pub stream_id: String,
    /// Tracks in arrival order
    pub tracks: Vec<Arc<dyn MediaTrack>>,
}

impl MediaView {
    /// Create an empty view for a stream
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            tracks: Vec::new(),
        }
    }

    /// Whether a track of the given kind is present
    pub fn has_kind(&self, kind: MediaKind) -> bool {
        self.tracks.iter().any(|t| t.kind() == kind)
    }
}
