//! Peer session: one transport negotiation with one remote party
//!
//! Wraps a [`PeerTransport`] and enforces the offer/answer ordering for the
//! session's role. Remote ICE candidates that arrive before the remote
//! description are buffered and applied, in arrival order, the moment the
//! description is set.

use super::transport::{
    ConnectionState, PeerTransport, SenderId, TransportEvent, TransportEventHandler,
    TransportFactory,
};
use crate::config::TransportConfig;
use crate::media::{LocalMedia, MediaTrack};
use crate::signaling::{IceCandidate, SdpType, SessionDescription};
use crate::{Error, Result, UserId};
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Which half of the offer/answer exchange this side performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallRole {
    /// Sends the offer
    Caller,
    /// Answers an inbound offer
    Callee,
}

impl fmt::Display for CallRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallRole::Caller => f.write_str("caller"),
            CallRole::Callee => f.write_str("callee"),
        }
    }
}

/// What `add_remote_candidate` did with a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateDisposition {
    /// Applied to the transport immediately
    Applied,
    /// Held until the remote description is set
    Buffered,
}

/// Callback for remote tracks (stream id, track)
pub type RemoteTrackCallback = Arc<dyn Fn(String, Arc<dyn MediaTrack>) + Send + Sync>;

/// Callback for connection state transitions
pub type StateChangeCallback = Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// Callback for locally discovered ICE candidates
pub type LocalCandidateCallback = Arc<dyn Fn(IceCandidate) + Send + Sync>;

/// Callback handlers, read at dispatch time so they may be set late
#[derive(Default)]
struct SessionCallbacks {
    on_remote_track: RwLock<Option<RemoteTrackCallback>>,
    on_state_change: RwLock<Option<StateChangeCallback>>,
    on_local_candidate: RwLock<Option<LocalCandidateCallback>>,
}

/// One negotiated transport session with exactly one remote party
pub struct PeerSession {
    /// Unique identifier for this session instance
    session_id: String,

    /// Remote party (immutable)
    remote_user_id: UserId,

    /// Offer/answer role
    role: CallRole,

    /// ICE configuration for the transport handle
    config: TransportConfig,

    /// Allocator for the transport handle
    factory: Arc<dyn TransportFactory>,

    /// Transport handle, allocated lazily
    transport: Option<Arc<dyn PeerTransport>>,

    /// Senders added by `attach_local_tracks`
    senders: Vec<SenderId>,

    /// Local tracks attached to the transport
    local_tracks: Vec<Arc<dyn MediaTrack>>,

    local_description: Option<SessionDescription>,
    remote_description: Option<SessionDescription>,

    /// Remote candidates received before the remote description
    pending_candidates: VecDeque<IceCandidate>,

    /// Current connection state (also updated from transport events)
    state: Arc<RwLock<ConnectionState>>,

    callbacks: Arc<SessionCallbacks>,

    closed: bool,
}

impl PeerSession {
    /// Create a session; no transport is allocated until `create_or_reuse`
    pub fn new(
        remote_user_id: impl Into<UserId>,
        role: CallRole,
        config: TransportConfig,
        factory: Arc<dyn TransportFactory>,
    ) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            remote_user_id: remote_user_id.into(),
            role,
            config,
            factory,
            transport: None,
            senders: Vec::new(),
            local_tracks: Vec::new(),
            local_description: None,
            remote_description: None,
            pending_candidates: VecDeque::new(),
            state: Arc::new(RwLock::new(ConnectionState::New)),
            callbacks: Arc::new(SessionCallbacks::default()),
            closed: false,
        }
    }

    /// Get the session ID
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Get the remote user ID
    pub fn remote_user_id(&self) -> &str {
        &self.remote_user_id
    }

    /// Get the role
    pub fn role(&self) -> CallRole {
        self.role
    }

    /// Get the current connection state
    pub fn connection_state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Whether a local description has been applied
    pub fn has_local_description(&self) -> bool {
        self.local_description.is_some()
    }

    /// Whether a remote description has been applied
    pub fn has_remote_description(&self) -> bool {
        self.remote_description.is_some()
    }

    /// Number of remote candidates waiting for the remote description
    pub fn pending_candidate_count(&self) -> usize {
        self.pending_candidates.len()
    }

    /// Whether `close` has run
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Register a callback for remote tracks
    pub fn on_remote_track(&self, callback: RemoteTrackCallback) {
        *self.callbacks.on_remote_track.write() = Some(callback);
    }

    /// Register a callback for connection state transitions
    pub fn on_connection_state_change(&self, callback: StateChangeCallback) {
        *self.callbacks.on_state_change.write() = Some(callback);
    }

    /// Register a callback for local ICE candidates
    pub fn on_local_candidate(&self, callback: LocalCandidateCallback) {
        *self.callbacks.on_local_candidate.write() = Some(callback);
    }

    /// Return the open transport handle, allocating it on first use
    #[instrument(skip(self), fields(session_id = %self.session_id, remote_user_id = %self.remote_user_id))]
    pub async fn create_or_reuse(&mut self) -> Result<Arc<dyn PeerTransport>> {
        if self.closed {
            return Err(Error::InvalidState("Peer session is closed".to_string()));
        }

        if let Some(transport) = &self.transport {
            return Ok(Arc::clone(transport));
        }

        let transport = self
            .factory
            .create(&self.config, self.event_handler())
            .await?;
        self.transport = Some(Arc::clone(&transport));

        info!(
            "Created transport for {} session with {}",
            self.role, self.remote_user_id
        );

        Ok(transport)
    }

    /// Add every track of `media` to the transport
    pub async fn attach_local_tracks(&mut self, media: &LocalMedia) -> Result<usize> {
        if media.is_empty() {
            return Err(Error::MediaUnavailable(format!(
                "Local stream {} has no tracks",
                media.stream_id()
            )));
        }

        let transport = self.require_transport()?;

        for track in media.tracks() {
            let sender = transport.add_track(Arc::clone(track)).await?;
            self.senders.push(sender);
            self.local_tracks.push(Arc::clone(track));
        }

        debug!(
            "Attached {} local tracks to session {}",
            media.tracks().len(),
            self.session_id
        );

        Ok(media.tracks().len())
    }

    /// Create the caller's offer
    pub async fn create_offer(&self) -> Result<SessionDescription> {
        if self.role != CallRole::Caller {
            return Err(Error::InvalidState(
                "Only the caller creates an offer".to_string(),
            ));
        }
        if self.local_description.is_some() {
            return Err(Error::InvalidState(
                "Offer already created for this session".to_string(),
            ));
        }

        let offer = self.require_transport()?.create_offer().await?;
        debug!("Created SDP offer for {}", self.remote_user_id);
        Ok(offer)
    }

    /// Create the callee's answer to the applied remote offer
    pub async fn create_answer(&self) -> Result<SessionDescription> {
        if self.role != CallRole::Callee {
            return Err(Error::InvalidState(
                "Only the callee creates an answer".to_string(),
            ));
        }
        match &self.remote_description {
            Some(desc) if desc.sdp_type == SdpType::Offer => {}
            _ => {
                return Err(Error::InvalidState(
                    "Remote offer must be applied before answering".to_string(),
                ))
            }
        }
        if self.local_description.is_some() {
            return Err(Error::InvalidState(
                "Answer already created for this session".to_string(),
            ));
        }

        let answer = self.require_transport()?.create_answer().await?;
        debug!("Created SDP answer for {}", self.remote_user_id);
        Ok(answer)
    }

    /// Apply the local description
    pub async fn set_local_description(&mut self, desc: SessionDescription) -> Result<()> {
        let transport = self.require_transport()?;
        transport.set_local_description(desc.clone()).await?;
        self.local_description = Some(desc);
        self.mark_negotiating();
        Ok(())
    }

    /// Apply the remote description, then drain buffered candidates
    ///
    /// Returns the number of buffered candidates that were drained.
    pub async fn set_remote_description(&mut self, desc: SessionDescription) -> Result<usize> {
        if self.remote_description.is_some() {
            return Err(Error::InvalidState(
                "Remote description already applied".to_string(),
            ));
        }

        let expected = match self.role {
            CallRole::Caller => SdpType::Answer,
            CallRole::Callee => SdpType::Offer,
        };
        if desc.sdp_type != expected {
            return Err(Error::SdpError(format!(
                "A {} expects a remote {:?}, got {:?}",
                self.role, expected, desc.sdp_type
            )));
        }

        let transport = self.require_transport()?;
        transport.set_remote_description(desc.clone()).await?;
        self.remote_description = Some(desc);
        self.mark_negotiating();

        let buffered: Vec<IceCandidate> = self.pending_candidates.drain(..).collect();
        let drained = buffered.len();

        for candidate in buffered {
            if let Err(e) = transport.add_ice_candidate(candidate).await {
                warn!(
                    "Skipping buffered ICE candidate for {}: {}",
                    self.remote_user_id, e
                );
            }
        }

        if drained > 0 {
            debug!(
                "Applied {} buffered ICE candidates for {}",
                drained, self.remote_user_id
            );
        }

        Ok(drained)
    }

    /// Apply a remote candidate, or buffer it until the remote description is set
    pub async fn add_remote_candidate(
        &mut self,
        candidate: IceCandidate,
    ) -> Result<CandidateDisposition> {
        if self.closed {
            return Err(Error::InvalidState("Peer session is closed".to_string()));
        }

        if self.remote_description.is_none() {
            self.pending_candidates.push_back(candidate);
            return Ok(CandidateDisposition::Buffered);
        }

        self.require_transport()?
            .add_ice_candidate(candidate)
            .await?;
        Ok(CandidateDisposition::Applied)
    }

    /// Remove senders, stop local tracks and release the transport
    ///
    /// Closing an already-closed session is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            debug!("Peer session {} already closed", self.session_id);
            return Ok(());
        }
        self.closed = true;

        info!("Closing peer session with {}", self.remote_user_id);

        let transport = self.transport.take();

        if let Some(transport) = &transport {
            for sender in self.senders.drain(..) {
                if let Err(e) = transport.remove_track(&sender).await {
                    warn!("Failed to remove sender {:?}: {}", sender, e);
                }
            }
        }
        self.senders.clear();

        for track in self.local_tracks.drain(..) {
            track.stop();
        }

        self.pending_candidates.clear();
        *self.state.write() = ConnectionState::Closed;

        match transport {
            Some(transport) => transport.close().await,
            None => Ok(()),
        }
    }

    fn require_transport(&self) -> Result<Arc<dyn PeerTransport>> {
        if self.closed {
            return Err(Error::InvalidState("Peer session is closed".to_string()));
        }
        self.transport.clone().ok_or_else(|| {
            Error::InvalidState("Transport has not been created for this session".to_string())
        })
    }

    fn mark_negotiating(&self) {
        let mut state = self.state.write();
        if *state == ConnectionState::New {
            *state = ConnectionState::Negotiating;
        }
    }

    fn event_handler(&self) -> TransportEventHandler {
        let state = Arc::clone(&self.state);
        let callbacks = Arc::clone(&self.callbacks);
        let remote_user_id = self.remote_user_id.clone();

        Arc::new(move |event: TransportEvent| match event {
            TransportEvent::StateChanged(new_state) => {
                let old_state = {
                    let mut guard = state.write();
                    let old_state = *guard;
                    if old_state != new_state && old_state != ConnectionState::Closed {
                        *guard = new_state;
                    }
                    old_state
                };

                if old_state == new_state || old_state == ConnectionState::Closed {
                    return;
                }

                debug!(
                    "Peer {} state transition: {:?} -> {:?}",
                    remote_user_id, old_state, new_state
                );

                let callback = callbacks.on_state_change.read().clone();
                if let Some(callback) = callback {
                    callback(new_state);
                }
            }
            TransportEvent::RemoteTrack { stream_id, track } => {
                let callback = callbacks.on_remote_track.read().clone();
                if let Some(callback) = callback {
                    callback(stream_id, track);
                }
            }
            TransportEvent::LocalCandidate(candidate) => {
                let callback = callbacks.on_local_candidate.read().clone();
                if let Some(callback) = callback {
                    callback(candidate);
                }
            }
        })
    }
}

impl fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerSession")
            .field("session_id", &self.session_id)
            .field("remote_user_id", &self.remote_user_id)
            .field("role", &self.role)
            .field("state", &self.connection_state())
            .field("pending_candidates", &self.pending_candidates.len())
            .field("closed", &self.closed)
            .finish()
    }
}
