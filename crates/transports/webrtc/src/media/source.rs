//! Media source producing sample-fed tracks

use super::tracks::SampleTrack;
use async_trait::async_trait;
use peercall_core::{Error, LocalMedia, MediaConstraints, MediaSource, MediaTrack, Result};
use std::sync::Arc;
use tracing::info;

/// Hands out one [`SampleTrack`] per requested kind
///
/// There is no capture device behind these tracks; callers push encoded
/// frames into them (see [`SampleTrack::write_sample`]). The tracks can be
/// found again through [`LocalMedia::tracks`] and `MediaTrack::as_any`.
#[derive(Debug, Clone, Default)]
pub struct SampleTrackSource {
    /// Prefix for generated stream ids
    label: String,
}

impl SampleTrackSource {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

#[async_trait]
impl MediaSource for SampleTrackSource {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<LocalMedia> {
        if !constraints.audio && !constraints.video {
            return Err(Error::MediaUnavailable(
                "Neither audio nor video was requested".to_string(),
            ));
        }

        let label = if self.label.is_empty() {
            "peercall"
        } else {
            self.label.as_str()
        };
        let stream_id = format!("{}-{}", label, uuid::Uuid::new_v4());

        let mut tracks: Vec<Arc<dyn MediaTrack>> = Vec::new();
        if constraints.audio {
            tracks.push(Arc::new(SampleTrack::audio(
                format!("{}-audio", stream_id),
                stream_id.clone(),
            )));
        }
        if constraints.video {
            tracks.push(Arc::new(SampleTrack::video(
                format!("{}-video", stream_id),
                stream_id.clone(),
            )));
        }

        info!("Acquired {} sample tracks on {}", tracks.len(), stream_id);
        Ok(LocalMedia::new(stream_id, tracks))
    }
}
