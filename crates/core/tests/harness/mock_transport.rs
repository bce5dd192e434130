//! Recording transport handle

use async_trait::async_trait;
use parking_lot::Mutex;
use peercall_core::{
    ConnectionState, Error, IceCandidate, MediaTrack, PeerTransport, Result, SdpType, SenderId,
    SessionDescription, TransportConfig, TransportEvent, TransportEventHandler, TransportFactory,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Operation applied to a mock transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportOp {
    AddTrack(String),
    RemoveTrack(SenderId),
    CreateOffer,
    CreateAnswer,
    SetLocal(SdpType),
    SetRemote(SdpType),
    AddCandidate(String),
    Close,
}

/// Transport handle that records every call
pub struct MockTransport {
    pub config: TransportConfig,
    ops: Mutex<Vec<TransportOp>>,
    handler: TransportEventHandler,
    rejected_candidates: Mutex<HashSet<String>>,
    fail_remote_description: AtomicBool,
    next_sender: AtomicUsize,
    closes: AtomicUsize,
}

impl MockTransport {
    fn new(config: TransportConfig, handler: TransportEventHandler) -> Self {
        Self {
            config,
            ops: Mutex::new(Vec::new()),
            handler,
            rejected_candidates: Mutex::new(HashSet::new()),
            fail_remote_description: AtomicBool::new(false),
            next_sender: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }

    /// All operations so far
    pub fn ops(&self) -> Vec<TransportOp> {
        self.ops.lock().clone()
    }

    /// Candidate strings applied to the transport, in order
    pub fn applied_candidates(&self) -> Vec<String> {
        self.ops
            .lock()
            .iter()
            .filter_map(|op| match op {
                TransportOp::AddCandidate(c) => Some(c.clone()),
                _ => None,
            })
            .collect()
    }

    /// Index of the first matching operation
    pub fn position(&self, op: &TransportOp) -> Option<usize> {
        self.ops.lock().iter().position(|o| o == op)
    }

    /// Number of `close` calls
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Make `add_ice_candidate` reject this candidate
    pub fn reject_candidate(&self, candidate: &str) {
        self.rejected_candidates.lock().insert(candidate.to_string());
    }

    /// Make `set_remote_description` fail
    pub fn fail_remote_description(&self) {
        self.fail_remote_description.store(true, Ordering::SeqCst);
    }

    /// Deliver a transport event as the real transport would
    pub fn fire(&self, event: TransportEvent) {
        (self.handler)(event);
    }

    /// Shorthand for a state change event
    pub fn fire_state(&self, state: ConnectionState) {
        self.fire(TransportEvent::StateChanged(state));
    }

    fn record(&self, op: TransportOp) {
        self.ops.lock().push(op);
    }
}

#[async_trait]
impl PeerTransport for MockTransport {
    async fn add_track(&self, track: Arc<dyn MediaTrack>) -> Result<SenderId> {
        self.record(TransportOp::AddTrack(track.id().to_string()));
        let n = self.next_sender.fetch_add(1, Ordering::SeqCst);
        Ok(SenderId(format!("sender-{}", n)))
    }

    async fn remove_track(&self, sender: &SenderId) -> Result<()> {
        self.record(TransportOp::RemoveTrack(sender.clone()));
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        self.record(TransportOp::CreateOffer);
        Ok(SessionDescription::offer("v=0 mock-offer"))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.record(TransportOp::CreateAnswer);
        Ok(SessionDescription::answer("v=0 mock-answer"))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.record(TransportOp::SetLocal(desc.sdp_type));
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        if self.fail_remote_description.load(Ordering::SeqCst) {
            return Err(Error::SdpError("mock rejects remote description".into()));
        }
        self.record(TransportOp::SetRemote(desc.sdp_type));
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        if self.rejected_candidates.lock().contains(&candidate.candidate) {
            return Err(Error::IceCandidateError(format!(
                "mock rejects {}",
                candidate.candidate
            )));
        }
        self.record(TransportOp::AddCandidate(candidate.candidate));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.record(TransportOp::Close);
        Ok(())
    }
}

/// Factory that keeps every transport it creates
#[derive(Default)]
pub struct MockTransportFactory {
    created: Mutex<Vec<Arc<MockTransport>>>,
}

impl MockTransportFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of transports created
    pub fn created_count(&self) -> usize {
        self.created.lock().len()
    }

    /// Most recently created transport
    pub fn last(&self) -> Option<Arc<MockTransport>> {
        self.created.lock().last().cloned()
    }
}

#[async_trait]
impl TransportFactory for MockTransportFactory {
    async fn create(
        &self,
        config: &TransportConfig,
        on_event: TransportEventHandler,
    ) -> Result<Arc<dyn PeerTransport>> {
        let transport = Arc::new(MockTransport::new(config.clone(), on_event));
        self.created.lock().push(Arc::clone(&transport));
        Ok(transport)
    }
}
