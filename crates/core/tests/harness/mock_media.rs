//! Scriptable capture source

use async_trait::async_trait;
use parking_lot::Mutex;
use peercall_core::{
    Error, LocalMedia, MediaConstraints, MediaKind, MediaSource, MediaTrack, Result,
};
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Track that counts stop calls
#[derive(Debug)]
pub struct MockTrack {
    id: String,
    kind: MediaKind,
    stopped: AtomicBool,
    stops: AtomicUsize,
}

impl MockTrack {
    pub fn new(id: impl Into<String>, kind: MediaKind) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            kind,
            stopped: AtomicBool::new(false),
            stops: AtomicUsize::new(0),
        })
    }

    /// Number of `stop` calls that actually stopped the track
    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl MediaTrack for MockTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Capture source handing out one audio and one video track per call
pub struct MockMedia {
    fail: AtomicBool,
    gate: Mutex<Option<Arc<Notify>>>,
    acquisitions: AtomicUsize,
    tracks: Mutex<Vec<Arc<MockTrack>>>,
}

impl MockMedia {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            fail: AtomicBool::new(false),
            gate: Mutex::new(None),
            acquisitions: AtomicUsize::new(0),
            tracks: Mutex::new(Vec::new()),
        })
    }

    /// Make every acquisition fail with `MediaUnavailable`
    pub fn fail(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    /// Hold acquisitions until `release_gate` is called
    pub fn hold(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock() = Some(Arc::clone(&gate));
        gate
    }

    /// Number of completed acquisitions
    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    /// Every track handed out so far
    pub fn tracks(&self) -> Vec<Arc<MockTrack>> {
        self.tracks.lock().clone()
    }

    /// Whether every track handed out has been stopped exactly once
    pub fn all_released(&self) -> bool {
        let tracks = self.tracks.lock();
        !tracks.is_empty() && tracks.iter().all(|t| t.stop_count() == 1)
    }
}

#[async_trait]
impl MediaSource for MockMedia {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<LocalMedia> {
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::MediaUnavailable("permission denied".into()));
        }

        let n = self.acquisitions.fetch_add(1, Ordering::SeqCst);
        let mut tracks: Vec<Arc<dyn MediaTrack>> = Vec::new();
        let mut handed_out = self.tracks.lock();

        if constraints.audio {
            let track = MockTrack::new(format!("audio-{}", n), MediaKind::Audio);
            handed_out.push(Arc::clone(&track));
            tracks.push(track);
        }
        if constraints.video {
            let track = MockTrack::new(format!("video-{}", n), MediaKind::Video);
            handed_out.push(Arc::clone(&track));
            tracks.push(track);
        }

        Ok(LocalMedia::new(format!("local-{}", n), tracks))
    }
}
