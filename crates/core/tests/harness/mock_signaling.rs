//! Recording signaling channel

use async_trait::async_trait;
use parking_lot::Mutex;
use peercall_core::signaling::address_payload;
use peercall_core::{
    Error, InboundSignal, Result, SignalEvent, SignalHandler, SignalingChannel, SubscriptionId,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// An outbound signal as the relay would receive it
#[derive(Debug, Clone, PartialEq)]
pub struct SentSignal {
    pub to_user_id: String,
    pub event: SignalEvent,
    pub payload: Value,
}

/// In-memory relay endpoint
pub struct MockSignaling {
    connected: AtomicBool,
    next_id: AtomicU64,
    handlers: Mutex<HashMap<u64, (SignalEvent, SignalHandler)>>,
    sent: Mutex<Vec<SentSignal>>,
}

impl MockSignaling {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connected: AtomicBool::new(true),
            next_id: AtomicU64::new(1),
            handlers: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Deliver an inbound event to every matching handler
    pub fn inject(&self, event: SignalEvent, payload: Value) {
        let handlers: Vec<SignalHandler> = self
            .handlers
            .lock()
            .values()
            .filter(|(e, _)| *e == event)
            .map(|(_, h)| Arc::clone(h))
            .collect();

        for handler in handlers {
            handler(InboundSignal {
                event,
                payload: payload.clone(),
            });
        }
    }

    /// Inject an offer from `from`
    pub fn inject_offer(&self, from: &str) {
        self.inject(
            SignalEvent::Offer,
            json!({"fromUserId": from, "offer": {"type": "offer", "sdp": "v=0 remote-offer"}}),
        );
    }

    /// Inject an answer from `from`
    pub fn inject_answer(&self, from: &str) {
        self.inject(
            SignalEvent::Answer,
            json!({"fromUserId": from, "answer": {"type": "answer", "sdp": "v=0 remote-answer"}}),
        );
    }

    /// Inject a candidate from `from`
    pub fn inject_candidate(&self, from: &str, candidate: &str) {
        self.inject(
            SignalEvent::Ice,
            json!({
                "fromUserId": from,
                "candidate": {"candidate": candidate, "sdpMid": "0", "sdpMLineIndex": 0}
            }),
        );
    }

    /// Inject a hangup from `from`
    pub fn inject_hangup(&self, from: &str) {
        self.inject(SignalEvent::Hangup, json!({"fromUserId": from}));
    }

    /// Every signal sent so far
    pub fn sent(&self) -> Vec<SentSignal> {
        self.sent.lock().clone()
    }

    /// Signals of one event type
    pub fn sent_of(&self, event: SignalEvent) -> Vec<SentSignal> {
        self.sent
            .lock()
            .iter()
            .filter(|s| s.event == event)
            .cloned()
            .collect()
    }

    pub fn count(&self, event: SignalEvent) -> usize {
        self.sent_of(event).len()
    }

    /// Number of registered handlers
    pub fn handler_count(&self) -> usize {
        self.handlers.lock().len()
    }
}

#[async_trait]
impl SignalingChannel for MockSignaling {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send(&self, to_user_id: &str, event: SignalEvent, payload: Value) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::SignalingUnavailable("mock relay offline".into()));
        }
        self.sent.lock().push(SentSignal {
            to_user_id: to_user_id.to_string(),
            event,
            payload: address_payload(to_user_id, payload),
        });
        Ok(())
    }

    fn on_event(&self, event: SignalEvent, handler: SignalHandler) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.handlers.lock().insert(id, (event, handler));
        SubscriptionId(id)
    }

    fn off(&self, subscription: SubscriptionId) {
        self.handlers.lock().remove(&subscription.0);
    }
}
