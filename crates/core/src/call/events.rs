//! Events published to call observers

use super::state::{CallState, EndReason};
use crate::media::MediaView;
use crate::UserId;

/// Notification broadcast by the call controller
///
/// Media views carry shared, read-only track handles; the controller keeps
/// ownership of the underlying resources.
#[derive(Debug, Clone)]
pub enum CallEvent {
    /// Controller state changed
    StateChanged(CallState),

    /// An inbound offer arrived and is being answered
    Incoming { remote_user_id: UserId },

    /// Local capture is available for preview
    LocalMedia(MediaView),

    /// A remote track arrived; the view holds every remote track so far
    RemoteMedia {
        remote_user_id: UserId,
        media: MediaView,
    },

    /// Transport connected
    Connected { remote_user_id: UserId },

    /// The call was torn down
    Ended {
        remote_user_id: UserId,
        reason: EndReason,
    },
}

impl CallEvent {
    /// Short event name for logs
    pub fn name(&self) -> &'static str {
        match self {
            CallEvent::StateChanged(_) => "state_changed",
            CallEvent::Incoming { .. } => "incoming",
            CallEvent::LocalMedia(_) => "local_media",
            CallEvent::RemoteMedia { .. } => "remote_media",
            CallEvent::Connected { .. } => "connected",
            CallEvent::Ended { .. } => "ended",
        }
    }
}
