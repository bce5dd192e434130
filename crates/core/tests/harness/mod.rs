//! Call test harness
//!
//! Recording stand-ins for the three capabilities the call controller
//! depends on:
//! - `MockTransportFactory` / `MockTransport`: log every transport operation
//!   and let tests fire transport events
//! - `MockSignaling`: records outbound signals and injects inbound ones
//! - `MockMedia`: hands out `MockTrack`s, can fail or be held until released

#![allow(dead_code)]

pub mod mock_media;
pub mod mock_signaling;
pub mod mock_transport;

use std::time::Duration;

pub use mock_media::{MockMedia, MockTrack};
pub use mock_signaling::{MockSignaling, SentSignal};
pub use mock_transport::{MockTransport, MockTransportFactory, TransportOp};

use peercall_core::{CallEvent, CallState};
use tokio::sync::{broadcast, watch};

/// Default wait for asynchronous conditions
pub const WAIT: Duration = Duration::from_secs(2);

/// Install a test subscriber (ignored if one is already set)
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Poll `condition` until it holds, panicking after `WAIT`
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("Timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Wait until the watched state equals `state`
pub async fn wait_for_state(rx: &mut watch::Receiver<CallState>, state: CallState) {
    tokio::time::timeout(WAIT, rx.wait_for(|current| *current == state))
        .await
        .unwrap_or_else(|_| panic!("Timed out waiting for state {}", state))
        .expect("state channel closed");
}

/// Wait for the next event matching `predicate`, skipping others
pub async fn wait_for_event(
    rx: &mut broadcast::Receiver<CallEvent>,
    predicate: impl Fn(&CallEvent) -> bool,
) -> CallEvent {
    tokio::time::timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("Timed out waiting for call event")
}
