//! Sample-fed local tracks and remote track wrappers

pub mod source;
pub mod tracks;

pub use source::SampleTrackSource;
pub use tracks::{
    RemoteTrack, SampleTrack, OPUS_CHANNELS, OPUS_CLOCK_RATE, OPUS_FRAME_DURATION,
    OPUS_SILENCE_FRAME, VIDEO_CLOCK_RATE,
};
