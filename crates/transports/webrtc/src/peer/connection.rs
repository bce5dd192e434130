//! WebRTC peer transport
//!
//! Wraps a `webrtc::RTCPeerConnection` behind the `PeerTransport` trait and
//! forwards its callbacks (connection state, remote tracks, local ICE
//! candidates) as `TransportEvent`s.

use crate::media::{RemoteTrack, SampleTrack};
use async_trait::async_trait;
use parking_lot::Mutex;
use peercall_core::{
    ConnectionState, Error, IceCandidate, MediaTrack, PeerTransport, Result, SdpType, SenderId,
    SessionDescription, TransportEvent, TransportEventHandler,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Map a webrtc connection state onto the call transport state
///
/// `Disconnected` maps to `Negotiating` because ICE may still recover.
pub fn map_connection_state(state: RTCPeerConnectionState) -> Option<ConnectionState> {
    match state {
        RTCPeerConnectionState::New => Some(ConnectionState::New),
        RTCPeerConnectionState::Connecting | RTCPeerConnectionState::Disconnected => {
            Some(ConnectionState::Negotiating)
        }
        RTCPeerConnectionState::Connected => Some(ConnectionState::Connected),
        RTCPeerConnectionState::Failed => Some(ConnectionState::Failed),
        RTCPeerConnectionState::Closed => Some(ConnectionState::Closed),
        _ => None,
    }
}

/// `PeerTransport` over one `RTCPeerConnection`
pub struct WebRtcPeerTransport {
    /// Unique identifier for this connection instance
    connection_id: String,

    /// Actual WebRTC peer connection
    peer_connection: Arc<RTCPeerConnection>,

    /// RTP senders by id (retained until removed)
    senders: Mutex<HashMap<String, Arc<RTCRtpSender>>>,
}

impl WebRtcPeerTransport {
    /// Wrap `peer_connection` and route its callbacks to `on_event`
    pub fn new(peer_connection: Arc<RTCPeerConnection>, on_event: TransportEventHandler) -> Self {
        let connection_id = uuid::Uuid::new_v4().to_string();

        let handler = Arc::clone(&on_event);
        let id = connection_id.clone();
        peer_connection.on_peer_connection_state_change(Box::new(
            move |s: RTCPeerConnectionState| {
                debug!("Connection {} state: {}", id, s);
                if let Some(state) = map_connection_state(s) {
                    handler(TransportEvent::StateChanged(state));
                }
                Box::pin(async {})
            },
        ));

        let handler = Arc::clone(&on_event);
        let id = connection_id.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            if let Some(candidate) = candidate {
                match candidate.to_json() {
                    Ok(init) => handler(TransportEvent::LocalCandidate(from_candidate_init(init))),
                    Err(e) => warn!("Connection {}: failed to encode candidate: {}", id, e),
                }
            }
            Box::pin(async {})
        }));

        let handler = on_event;
        let id = connection_id.clone();
        peer_connection.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let stream_id = track.stream_id();
                info!(
                    "Connection {}: remote {:?} track {} on stream {}",
                    id,
                    track.kind(),
                    track.id(),
                    stream_id
                );
                handler(TransportEvent::RemoteTrack {
                    stream_id,
                    track: Arc::new(RemoteTrack::new(track)),
                });
                Box::pin(async {})
            },
        ));

        Self {
            connection_id,
            peer_connection,
            senders: Mutex::new(HashMap::new()),
        }
    }

    /// Get the connection ID
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Get the underlying WebRTC peer connection
    pub fn peer_connection(&self) -> &Arc<RTCPeerConnection> {
        &self.peer_connection
    }

    /// Number of live senders
    pub fn sender_count(&self) -> usize {
        self.senders.lock().len()
    }
}

fn from_candidate_init(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

fn to_candidate_init(candidate: IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_mline_index,
        username_fragment: candidate.username_fragment,
    }
}

fn to_rtc_description(desc: SessionDescription) -> Result<RTCSessionDescription> {
    let parsed = match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
    };
    parsed.map_err(|e| Error::SdpError(format!("Failed to parse {:?}: {}", desc.sdp_type, e)))
}

#[async_trait]
impl PeerTransport for WebRtcPeerTransport {
    async fn add_track(&self, track: Arc<dyn MediaTrack>) -> Result<SenderId> {
        let sample_track = track.as_any().downcast_ref::<SampleTrack>().ok_or_else(|| {
            Error::MediaUnavailable(format!(
                "Track {} is not a sample track and cannot be sent",
                track.id()
            ))
        })?;

        let sender = self
            .peer_connection
            .add_track(sample_track.local_track() as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| Error::WebRtcError(format!("Failed to add track: {}", e)))?;

        let sender_id = uuid::Uuid::new_v4().to_string();
        self.senders.lock().insert(sender_id.clone(), sender);

        debug!(
            "Connection {}: added {:?} track {}",
            self.connection_id,
            track.kind(),
            track.id()
        );

        Ok(SenderId(sender_id))
    }

    async fn remove_track(&self, sender: &SenderId) -> Result<()> {
        let rtp_sender = self.senders.lock().remove(&sender.0).ok_or_else(|| {
            Error::InvalidState(format!("Unknown sender {}", sender.0))
        })?;

        self.peer_connection
            .remove_track(&rtp_sender)
            .await
            .map_err(|e| Error::WebRtcError(format!("Failed to remove track: {}", e)))
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create offer: {}", e)))?;

        debug!("Connection {}: created SDP offer", self.connection_id);
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create answer: {}", e)))?;

        debug!("Connection {}: created SDP answer", self.connection_id);
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.peer_connection
            .set_local_description(to_rtc_description(desc)?)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.peer_connection
            .set_remote_description(to_rtc_description(desc)?)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.peer_connection
            .add_ice_candidate(to_candidate_init(candidate))
            .await
            .map_err(|e| Error::IceCandidateError(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn close(&self) -> Result<()> {
        info!("Closing peer connection {}", self.connection_id);
        self.senders.lock().clear();

        self.peer_connection
            .close()
            .await
            .map_err(|e| Error::TransportFailed(format!("Failed to close connection: {}", e)))
    }
}
