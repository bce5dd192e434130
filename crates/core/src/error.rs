//! Error types for peer-to-peer call negotiation

/// Result type alias using the call Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while negotiating or running a call
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Local capture device denied, absent, or produced no tracks
    #[error("Media unavailable: {0}")]
    MediaUnavailable(String),

    /// Signaling channel is disconnected
    #[error("Signaling unavailable: {0}")]
    SignalingUnavailable(String),

    /// Signaling channel error other than disconnection
    #[error("Signaling error: {0}")]
    SignalingError(String),

    /// Negotiated transport reported a failure
    #[error("Transport failed: {0}")]
    TransportFailed(String),

    /// SDP negotiation error
    #[error("SDP negotiation error: {0}")]
    SdpError(String),

    /// ICE candidate error
    #[error("ICE candidate error: {0}")]
    IceCandidateError(String),

    /// Operation not valid in the current session or call state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A call is already in progress
    #[error("Busy: {0}")]
    Busy(String),

    /// The call ended before the operation completed
    #[error("Call ended: {0}")]
    CallEnded(String),

    /// The call controller is not running
    #[error("Call controller is not running")]
    ControllerStopped,

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    /// Internal error (should not occur in normal operation)
    #[error("Internal error: {0}")]
    InternalError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::SignalingUnavailable(_) | Error::SignalingError(_) | Error::IoError(_)
        )
    }

    /// Check if this error is a media acquisition error
    pub fn is_media_error(&self) -> bool {
        matches!(self, Error::MediaUnavailable(_))
    }

    /// Check if this error came from the signaling channel
    pub fn is_signaling_error(&self) -> bool {
        matches!(
            self,
            Error::SignalingUnavailable(_) | Error::SignalingError(_)
        )
    }

    /// Check if this error is a negotiation (SDP/ICE/transport) error
    pub fn is_negotiation_error(&self) -> bool {
        matches!(
            self,
            Error::SdpError(_)
                | Error::IceCandidateError(_)
                | Error::TransportFailed(_)
                | Error::WebRtcError(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::SerializationError(e.to_string())
    }
}
