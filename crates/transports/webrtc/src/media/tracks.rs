//! Media tracks backed by webrtc-rs track types

use bytes::Bytes;
use peercall_core::{Error, MediaKind, MediaTrack, Result};
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

/// Opus clock rate
pub const OPUS_CLOCK_RATE: u32 = 48_000;

/// Opus channel count as negotiated by browsers
pub const OPUS_CHANNELS: u16 = 2;

/// Standard 90kHz clock for video
pub const VIDEO_CLOCK_RATE: u32 = 90_000;

/// One 20 ms Opus frame of silence
pub const OPUS_SILENCE_FRAME: [u8; 3] = [0xf8, 0xff, 0xfe];

/// Duration of one Opus frame
pub const OPUS_FRAME_DURATION: Duration = Duration::from_millis(20);

/// Outbound track fed with encoded samples
///
/// Wraps a `TrackLocalStaticSample`; the application writes already-encoded
/// frames (Opus for audio, VP8 for video) with [`SampleTrack::write_sample`].
pub struct SampleTrack {
    id: String,
    kind: MediaKind,
    local: Arc<TrackLocalStaticSample>,
    stopped: AtomicBool,
}

impl SampleTrack {
    /// Create an Opus audio track
    pub fn audio(id: impl Into<String>, stream_id: impl Into<String>) -> Self {
        Self::new(
            id.into(),
            stream_id.into(),
            MediaKind::Audio,
            RTCRtpCodecCapability {
                mime_type: "audio/opus".to_string(),
                clock_rate: OPUS_CLOCK_RATE,
                channels: OPUS_CHANNELS,
                sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
                rtcp_feedback: vec![],
            },
        )
    }

    /// Create a VP8 video track
    pub fn video(id: impl Into<String>, stream_id: impl Into<String>) -> Self {
        Self::new(
            id.into(),
            stream_id.into(),
            MediaKind::Video,
            RTCRtpCodecCapability {
                mime_type: "video/VP8".to_string(),
                clock_rate: VIDEO_CLOCK_RATE,
                channels: 0,
                sdp_fmtp_line: String::new(),
                rtcp_feedback: vec![],
            },
        )
    }

    fn new(id: String, stream_id: String, kind: MediaKind, codec: RTCRtpCodecCapability) -> Self {
        let local = Arc::new(TrackLocalStaticSample::new(codec, id.clone(), stream_id));
        Self {
            id,
            kind,
            local,
            stopped: AtomicBool::new(false),
        }
    }

    /// Underlying webrtc track, for adding to a peer connection
    pub fn local_track(&self) -> Arc<TrackLocalStaticSample> {
        Arc::clone(&self.local)
    }

    /// Write one encoded frame
    pub async fn write_sample(&self, data: Bytes, duration: Duration) -> Result<()> {
        if self.is_stopped() {
            return Err(Error::InvalidState(format!("Track {} is stopped", self.id)));
        }

        let sample = Sample {
            data,
            duration,
            ..Default::default()
        };

        self.local
            .write_sample(&sample)
            .await
            .map_err(|e| Error::WebRtcError(format!("Failed to write sample: {}", e)))
    }
}

impl MediaTrack for SampleTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            debug!("Stopped local {:?} track {}", self.kind, self.id);
        }
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for SampleTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Inbound track received from the remote party
pub struct RemoteTrack {
    id: String,
    kind: MediaKind,
    remote: Arc<TrackRemote>,
    stopped: AtomicBool,
}

impl RemoteTrack {
    /// Wrap a webrtc remote track
    pub fn new(remote: Arc<TrackRemote>) -> Self {
        let kind = match remote.kind() {
            RTPCodecType::Audio => MediaKind::Audio,
            _ => MediaKind::Video,
        };

        Self {
            id: remote.id(),
            kind,
            remote,
            stopped: AtomicBool::new(false),
        }
    }

    /// Underlying webrtc track, for reading RTP packets
    pub fn track_remote(&self) -> Arc<TrackRemote> {
        Arc::clone(&self.remote)
    }
}

impl MediaTrack for RemoteTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}
