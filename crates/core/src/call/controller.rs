//! Call controller
//!
//! A single tokio task (the engine) owns the active call and processes every
//! input in arrival order: user commands, inbound signals, transport events,
//! media completions and timers. Media acquisition runs in its own task and
//! reports back through the same queue, so a hangup or a burst of ICE
//! candidates is handled while capture is still pending. Every queued result
//! carries the id of the call it belongs to; results for a call that has
//! already ended are discarded (late media is released immediately).

use super::events::CallEvent;
use super::state::{CallState, EndReason};
use crate::config::CallConfig;
use crate::media::{LocalMedia, MediaSource, MediaTrack, MediaView};
use crate::peer::{
    CallRole, CandidateDisposition, ConnectionState, PeerSession, TransportEvent,
    TransportFactory,
};
use crate::signaling::{
    AnswerPayload, CallSignal, IceCandidate, IcePayload, InboundSignal, OfferPayload,
    PeerPayload, SdpType, SessionDescription, SignalEvent, SignalingChannel, SubscriptionId,
};
use crate::{Error, Result, UserId};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Capacity of the observer broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Peer-to-peer call state machine
///
/// Create with [`CallController::new`], attach a signaling channel with
/// [`start`](CallController::start), then place calls with
/// [`call_user`](CallController::call_user). Inbound offers are answered
/// automatically while idle.
///
/// Answers, candidates, hangups and busy signals whose `fromUserId` names
/// someone other than the active remote party are dropped.
pub struct CallController {
    config: Arc<CallConfig>,
    transports: Arc<dyn TransportFactory>,
    media: Arc<dyn MediaSource>,
    state_tx: Arc<watch::Sender<CallState>>,
    events_tx: broadcast::Sender<CallEvent>,
    running: Mutex<Option<Running>>,
}

/// Handles owned by a started controller
struct Running {
    commands: mpsc::UnboundedSender<Command>,
    channel: Arc<dyn SignalingChannel>,
    subscriptions: Vec<SubscriptionId>,
    task: JoinHandle<()>,
}

impl Running {
    fn unsubscribe(&mut self) {
        for subscription in self.subscriptions.drain(..) {
            self.channel.off(subscription);
        }
    }
}

impl CallController {
    /// Create a controller; fails if `config` does not validate
    pub fn new(
        config: CallConfig,
        transports: Arc<dyn TransportFactory>,
        media: Arc<dyn MediaSource>,
    ) -> Result<Self> {
        config.validate()?;

        let (state_tx, _) = watch::channel(CallState::Idle);
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            config: Arc::new(config),
            transports,
            media,
            state_tx: Arc::new(state_tx),
            events_tx,
            running: Mutex::new(None),
        })
    }

    /// Register call handlers on `channel` and start the engine task
    pub fn start(&self, channel: Arc<dyn SignalingChannel>) -> Result<()> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(Error::InvalidState(
                "Call controller already started".to_string(),
            ));
        }

        let (commands, receiver) = mpsc::unbounded_channel();

        let subscriptions = SignalEvent::ALL
            .iter()
            .map(|&event| {
                let commands = commands.clone();
                channel.on_event(
                    event,
                    Arc::new(move |signal: InboundSignal| {
                        let _ = commands.send(Command::Inbound(signal));
                    }),
                )
            })
            .collect();

        let engine = CallEngine {
            config: Arc::clone(&self.config),
            transports: Arc::clone(&self.transports),
            media: Arc::clone(&self.media),
            channel: Arc::clone(&channel),
            commands: commands.clone(),
            state_tx: Arc::clone(&self.state_tx),
            events_tx: self.events_tx.clone(),
            next_call_id: 0,
            call: None,
        };

        let task = tokio::spawn(engine.run(receiver));

        *running = Some(Running {
            commands,
            channel,
            subscriptions,
            task,
        });

        info!("Call controller started");
        Ok(())
    }

    /// Hang up any active call, deregister handlers and join the engine task
    ///
    /// Stopping a controller that is not running is a no-op. The controller
    /// may be started again afterwards.
    pub async fn stop(&self) -> Result<()> {
        let running = self.running.lock().take();
        let Some(mut running) = running else {
            return Ok(());
        };

        running.unsubscribe();

        let (reply_tx, reply_rx) = oneshot::channel();
        if running
            .commands
            .send(Command::Stop {
                reply: Some(reply_tx),
            })
            .is_ok()
        {
            let _ = reply_rx.await;
        }

        running
            .task
            .await
            .map_err(|e| Error::InternalError(format!("Call engine task failed: {}", e)))?;

        info!("Call controller stopped");
        Ok(())
    }

    /// Whether `start` has been called without a matching `stop`
    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Place an outbound call
    ///
    /// Resolves once the offer has been sent. Fails with `Busy` when a call
    /// already exists, `SignalingUnavailable` when the channel is down,
    /// `MediaUnavailable` when capture fails and `CallEnded` when the call is
    /// torn down before the offer goes out.
    pub async fn call_user(&self, remote_user_id: impl Into<UserId>) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send_command(Command::Call {
            remote_user_id: remote_user_id.into(),
            reply: reply_tx,
        })?;
        reply_rx.await.map_err(|_| Error::ControllerStopped)?
    }

    /// End the active call, notifying the remote party
    ///
    /// Returns once teardown is complete. A no-op while idle.
    pub async fn hangup(&self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send_command(Command::Hangup { reply: reply_tx })?;
        reply_rx.await.map_err(|_| Error::ControllerStopped)
    }

    /// Current state
    pub fn state(&self) -> CallState {
        *self.state_tx.borrow()
    }

    /// Watch state changes
    pub fn watch_state(&self) -> watch::Receiver<CallState> {
        self.state_tx.subscribe()
    }

    /// Subscribe to call events
    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.events_tx.subscribe()
    }

    /// Get the active configuration
    pub fn config(&self) -> &CallConfig {
        &self.config
    }

    fn send_command(&self, command: Command) -> Result<()> {
        let running = self.running.lock();
        let running = running.as_ref().ok_or(Error::ControllerStopped)?;
        running
            .commands
            .send(command)
            .map_err(|_| Error::ControllerStopped)
    }
}

impl Drop for CallController {
    fn drop(&mut self) {
        if let Some(mut running) = self.running.get_mut().take() {
            running.unsubscribe();
            let _ = running.commands.send(Command::Stop { reply: None });
        }
    }
}

/// Engine input
enum Command {
    Call {
        remote_user_id: UserId,
        reply: oneshot::Sender<Result<()>>,
    },
    Hangup {
        reply: oneshot::Sender<()>,
    },
    Inbound(InboundSignal),
    MediaReady {
        call_id: u64,
        result: Result<LocalMedia>,
    },
    Transport {
        call_id: u64,
        event: TransportEvent,
    },
    RingTimeout {
        call_id: u64,
    },
    Stop {
        reply: Option<oneshot::Sender<()>>,
    },
}

/// The one call a controller may hold
struct CallSession {
    id: u64,
    remote_user_id: UserId,
    role: CallRole,
    phase: CallState,
    peer: PeerSession,
    local_media: Option<LocalMedia>,
    remote_media: Option<MediaView>,
    /// Callee only, held until local media is ready
    pending_offer: Option<SessionDescription>,
    /// Caller only, resolved when the offer is sent
    pending_reply: Option<oneshot::Sender<Result<()>>>,
    ring_timer: Option<JoinHandle<()>>,
}

struct CallEngine {
    config: Arc<CallConfig>,
    transports: Arc<dyn TransportFactory>,
    media: Arc<dyn MediaSource>,
    channel: Arc<dyn SignalingChannel>,
    commands: mpsc::UnboundedSender<Command>,
    state_tx: Arc<watch::Sender<CallState>>,
    events_tx: broadcast::Sender<CallEvent>,
    next_call_id: u64,
    call: Option<CallSession>,
}

impl CallEngine {
    async fn run(mut self, mut receiver: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = receiver.recv().await {
            match command {
                Command::Call {
                    remote_user_id,
                    reply,
                } => self.handle_call(remote_user_id, reply),
                Command::Hangup { reply } => {
                    self.handle_local_hangup().await;
                    let _ = reply.send(());
                }
                Command::Inbound(signal) => self.handle_inbound(signal).await,
                Command::MediaReady { call_id, result } => {
                    self.handle_media_ready(call_id, result).await
                }
                Command::Transport { call_id, event } => {
                    self.handle_transport_event(call_id, event).await
                }
                Command::RingTimeout { call_id } => self.handle_ring_timeout(call_id).await,
                Command::Stop { reply } => {
                    if let Some(remote_user_id) = self.active_remote() {
                        self.send_peer_signal(&remote_user_id, SignalEvent::Hangup)
                            .await;
                    }
                    self.teardown(EndReason::Stopped).await;
                    if let Some(reply) = reply {
                        let _ = reply.send(());
                    }
                    break;
                }
            }
        }
        debug!("Call engine exited");
    }

    // ---- local commands ----

    fn handle_call(&mut self, remote_user_id: UserId, reply: oneshot::Sender<Result<()>>) {
        if let Some(call) = &self.call {
            let _ = reply.send(Err(Error::Busy(format!(
                "Already in a call with {}",
                call.remote_user_id
            ))));
            return;
        }

        if remote_user_id.trim().is_empty() {
            let _ = reply.send(Err(Error::InvalidState(
                "Remote user id must not be empty".to_string(),
            )));
            return;
        }

        if !self.channel.is_connected() {
            let _ = reply.send(Err(Error::SignalingUnavailable(
                "Signaling channel is not connected".to_string(),
            )));
            return;
        }

        let call_id = self.begin_call(remote_user_id, CallRole::Caller, CallState::Requesting);
        if let Some(call) = self.call.as_mut() {
            call.pending_reply = Some(reply);
            info!(call_id, remote_user_id = %call.remote_user_id, "Placing call");
        }
        self.set_state(CallState::Requesting);
        self.spawn_media_acquisition(call_id);
    }

    async fn handle_local_hangup(&mut self) {
        let Some(remote_user_id) = self.active_remote() else {
            debug!("Hangup requested while idle");
            return;
        };

        self.send_peer_signal(&remote_user_id, SignalEvent::Hangup)
            .await;
        self.teardown(EndReason::LocalHangup).await;
    }

    // ---- inbound signals ----

    async fn handle_inbound(&mut self, inbound: InboundSignal) {
        let event = inbound.event;
        let signal = match CallSignal::decode(event, inbound.payload) {
            Ok(signal) => signal,
            Err(e) => {
                warn!("Ignoring malformed {} signal: {}", event, e);
                return;
            }
        };

        if !matches!(signal, CallSignal::Offer(_)) && !self.accepts(&signal) {
            return;
        }

        match signal {
            CallSignal::Offer(payload) => self.handle_remote_offer(payload).await,
            CallSignal::Answer(payload) => self.handle_remote_answer(payload).await,
            CallSignal::Ice(payload) => self.handle_remote_candidate(payload.candidate).await,
            CallSignal::Hangup(_) => {
                info!("Remote party hung up");
                self.teardown(EndReason::RemoteHangup).await;
            }
            CallSignal::Busy(_) => self.handle_remote_busy().await,
        }
    }

    /// Whether a non-offer signal belongs to the active call
    fn accepts(&self, signal: &CallSignal) -> bool {
        let Some(call) = &self.call else {
            debug!("Ignoring {} while idle", signal.event());
            return false;
        };

        match signal.from_user_id() {
            Some(from) if from != call.remote_user_id => {
                warn!(
                    call_id = call.id,
                    "Dropping stray {} from {} during call with {}",
                    signal.event(),
                    from,
                    call.remote_user_id
                );
                false
            }
            _ => true,
        }
    }

    async fn handle_remote_offer(&mut self, payload: OfferPayload) {
        let from = match payload.from_user_id {
            Some(from) if !from.is_empty() => from,
            _ => {
                warn!("Ignoring offer without a sender");
                return;
            }
        };

        if let Some(call) = &self.call {
            if call.remote_user_id == from {
                warn!(
                    call_id = call.id,
                    "Ignoring repeated offer from {}; renegotiation is not supported", from
                );
            } else if self.config.decline_when_busy {
                info!(
                    call_id = call.id,
                    "Declining offer from {} while in a call with {}", from, call.remote_user_id
                );
                self.send_peer_signal(&from, SignalEvent::Busy).await;
            } else {
                debug!("Ignoring offer from {} while busy", from);
            }
            return;
        }

        if payload.offer.sdp_type != SdpType::Offer {
            warn!("Ignoring call offer from {} carrying a non-offer description", from);
            return;
        }

        let call_id = self.begin_call(from.clone(), CallRole::Callee, CallState::Ringing);
        if let Some(call) = self.call.as_mut() {
            call.pending_offer = Some(payload.offer);
        }

        info!(call_id, remote_user_id = %from, "Incoming call");
        self.set_state(CallState::Ringing);
        self.publish(CallEvent::Incoming {
            remote_user_id: from,
        });
        self.spawn_media_acquisition(call_id);
    }

    async fn handle_remote_answer(&mut self, payload: AnswerPayload) {
        let Some(call) = self.call.as_mut() else {
            return;
        };

        if call.role != CallRole::Caller
            || call.phase != CallState::Requesting
            || !call.peer.has_local_description()
            || call.peer.has_remote_description()
        {
            warn!(
                call_id = call.id,
                "Ignoring unexpected answer from {} ({} in {})",
                call.remote_user_id,
                call.role,
                call.phase
            );
            return;
        }

        match call.peer.set_remote_description(payload.answer).await {
            Ok(drained) => {
                debug!(
                    call_id = call.id,
                    "Applied answer from {} ({} buffered candidates)", call.remote_user_id, drained
                );
            }
            Err(e) => {
                warn!(call_id = call.id, "Failed to apply answer: {}", e);
                let remote_user_id = call.remote_user_id.clone();
                self.send_peer_signal(&remote_user_id, SignalEvent::Hangup)
                    .await;
                self.teardown(EndReason::NegotiationFailed(e.to_string()))
                    .await;
            }
        }
    }

    async fn handle_remote_candidate(&mut self, candidate: IceCandidate) {
        let Some(call) = self.call.as_mut() else {
            return;
        };

        match call.peer.add_remote_candidate(candidate).await {
            Ok(CandidateDisposition::Applied) => {
                debug!(call_id = call.id, "Applied remote ICE candidate");
            }
            Ok(CandidateDisposition::Buffered) => {
                debug!(
                    call_id = call.id,
                    "Buffered remote ICE candidate ({} pending)",
                    call.peer.pending_candidate_count()
                );
            }
            Err(e) => {
                warn!(call_id = call.id, "Skipping remote ICE candidate: {}", e);
            }
        }
    }

    async fn handle_remote_busy(&mut self) {
        let Some(call) = &self.call else {
            return;
        };

        if call.role != CallRole::Caller || call.phase != CallState::Requesting {
            warn!(call_id = call.id, "Ignoring busy outside of an outbound request");
            return;
        }

        info!(call_id = call.id, "{} is busy", call.remote_user_id);
        self.teardown(EndReason::RemoteBusy).await;
    }

    // ---- media ----

    fn spawn_media_acquisition(&self, call_id: u64) {
        let media = Arc::clone(&self.media);
        let constraints = self.config.media;
        let commands = self.commands.clone();

        tokio::spawn(async move {
            let result = media.acquire(&constraints).await;
            // If the engine is gone the command (and any media in it) is dropped
            let _ = commands.send(Command::MediaReady { call_id, result });
        });
    }

    async fn handle_media_ready(&mut self, call_id: u64, result: Result<LocalMedia>) {
        if !self.is_active(call_id) {
            if let Ok(media) = result {
                debug!(call_id, "Releasing media acquired for an ended call");
                media.release();
            }
            return;
        }

        let media = match result {
            Ok(media) => media,
            Err(e) => {
                warn!(call_id, "Media acquisition failed: {}", e);
                let reason = match &e {
                    Error::MediaUnavailable(msg) => msg.clone(),
                    other => other.to_string(),
                };
                if let Some(call) = self.call.as_mut() {
                    if let Some(reply) = call.pending_reply.take() {
                        let error = if e.is_media_error() {
                            e
                        } else {
                            Error::MediaUnavailable(reason.clone())
                        };
                        let _ = reply.send(Err(error));
                    }
                }
                if let Some((remote_user_id, CallRole::Callee)) = self.active_remote_and_role() {
                    self.send_peer_signal(&remote_user_id, SignalEvent::Hangup)
                        .await;
                }
                self.teardown(EndReason::MediaUnavailable(reason)).await;
                return;
            }
        };

        self.publish(CallEvent::LocalMedia(media.view()));

        let outcome = match self.active_remote_and_role() {
            Some((_, CallRole::Caller)) => self.negotiate_as_caller(media).await,
            Some((_, CallRole::Callee)) => self.negotiate_as_callee(media).await,
            None => Ok(()),
        };

        if let Err(e) = outcome {
            warn!(call_id, "Negotiation failed: {}", e);
            let reason = e.to_string();
            if let Some(call) = self.call.as_mut() {
                if let Some(reply) = call.pending_reply.take() {
                    let _ = reply.send(Err(e));
                }
            }
            if let Some((remote_user_id, CallRole::Callee)) = self.active_remote_and_role() {
                self.send_peer_signal(&remote_user_id, SignalEvent::Hangup)
                    .await;
            }
            self.teardown(EndReason::NegotiationFailed(reason)).await;
        }
    }

    // ---- negotiation ----

    async fn negotiate_as_caller(&mut self, media: LocalMedia) -> Result<()> {
        let call = self.active_call()?;

        call.peer.create_or_reuse().await?;
        let media = call.local_media.insert(media);
        call.peer.attach_local_tracks(media).await?;

        let offer = call.peer.create_offer().await?;
        call.peer.set_local_description(offer.clone()).await?;

        let remote_user_id = call.remote_user_id.clone();
        let call_id = call.id;
        let payload = serde_json::to_value(OfferPayload {
            from_user_id: None,
            offer,
        })?;

        if self
            .send_signal(&remote_user_id, SignalEvent::Offer, payload)
            .await
        {
            info!(call_id, "Offer sent to {}", remote_user_id);
        }

        if let Some(reply) = self
            .call
            .as_mut()
            .and_then(|call| call.pending_reply.take())
        {
            let _ = reply.send(Ok(()));
        }
        Ok(())
    }

    async fn negotiate_as_callee(&mut self, media: LocalMedia) -> Result<()> {
        let call = self.active_call()?;

        let offer = call.pending_offer.take().ok_or_else(|| {
            Error::InvalidState("Inbound call has no pending offer".to_string())
        })?;

        call.peer.create_or_reuse().await?;
        let media = call.local_media.insert(media);
        call.peer.attach_local_tracks(media).await?;

        let drained = call.peer.set_remote_description(offer).await?;
        debug!(
            call_id = call.id,
            "Applied offer ({} buffered candidates)", drained
        );

        let answer = call.peer.create_answer().await?;
        call.peer.set_local_description(answer.clone()).await?;

        let remote_user_id = call.remote_user_id.clone();
        let call_id = call.id;
        let payload = serde_json::to_value(AnswerPayload {
            from_user_id: None,
            answer,
        })?;

        if self
            .send_signal(&remote_user_id, SignalEvent::Answer, payload)
            .await
        {
            info!(call_id, "Answer sent to {}", remote_user_id);
        }
        Ok(())
    }

    // ---- transport ----

    async fn handle_transport_event(&mut self, call_id: u64, event: TransportEvent) {
        if !self.is_active(call_id) {
            debug!(call_id, "Discarding transport event for an ended call");
            return;
        }

        match event {
            TransportEvent::StateChanged(ConnectionState::Connected) => self.mark_connected(),
            TransportEvent::StateChanged(ConnectionState::Failed) => {
                warn!(call_id, "Transport failed");
                self.teardown(EndReason::TransportFailed).await;
            }
            TransportEvent::StateChanged(ConnectionState::Closed) => {
                info!(call_id, "Transport closed");
                self.teardown(EndReason::TransportClosed).await;
            }
            TransportEvent::StateChanged(state) => {
                debug!(call_id, "Transport state: {}", state);
            }
            TransportEvent::RemoteTrack { stream_id, track } => {
                let Some(call) = self.call.as_mut() else {
                    return;
                };
                let view = call
                    .remote_media
                    .get_or_insert_with(|| MediaView::new(stream_id.clone()));
                debug!(
                    call_id,
                    "Remote {:?} track {} on stream {}",
                    track.kind(),
                    track.id(),
                    stream_id
                );
                view.tracks.push(track);
                let event = CallEvent::RemoteMedia {
                    remote_user_id: call.remote_user_id.clone(),
                    media: view.clone(),
                };
                self.publish(event);
            }
            TransportEvent::LocalCandidate(candidate) => {
                let Some(remote_user_id) = self.active_remote() else {
                    return;
                };
                match serde_json::to_value(IcePayload {
                    from_user_id: None,
                    candidate,
                }) {
                    Ok(payload) => {
                        self.send_signal(&remote_user_id, SignalEvent::Ice, payload)
                            .await;
                    }
                    Err(e) => warn!(call_id, "Failed to encode local candidate: {}", e),
                }
            }
        }
    }

    fn mark_connected(&mut self) {
        let Some(call) = self.call.as_mut() else {
            return;
        };
        if call.phase == CallState::Connected {
            return;
        }

        call.phase = CallState::Connected;
        if let Some(timer) = call.ring_timer.take() {
            timer.abort();
        }

        info!(call_id = call.id, "Connected to {}", call.remote_user_id);
        let remote_user_id = call.remote_user_id.clone();
        self.set_state(CallState::Connected);
        self.publish(CallEvent::Connected { remote_user_id });
    }

    async fn handle_ring_timeout(&mut self, call_id: u64) {
        let Some(call) = &self.call else {
            return;
        };
        if call.id != call_id || call.phase == CallState::Connected {
            return;
        }

        info!(call_id, "No connection to {} before the ring timeout", call.remote_user_id);
        let remote_user_id = call.remote_user_id.clone();
        self.send_peer_signal(&remote_user_id, SignalEvent::Hangup)
            .await;
        self.teardown(EndReason::Timeout).await;
    }

    // ---- lifecycle ----

    /// Create the call record, wire its transport callbacks and arm the ring timer
    fn begin_call(&mut self, remote_user_id: UserId, role: CallRole, phase: CallState) -> u64 {
        self.next_call_id += 1;
        let call_id = self.next_call_id;

        let peer = PeerSession::new(
            remote_user_id.clone(),
            role,
            self.config.transport_config(),
            Arc::clone(&self.transports),
        );
        self.wire_peer(&peer, call_id);

        let ring_timer = self.config.ring_timeout().map(|timeout| {
            let commands = self.commands.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                let _ = commands.send(Command::RingTimeout { call_id });
            })
        });

        self.call = Some(CallSession {
            id: call_id,
            remote_user_id,
            role,
            phase,
            peer,
            local_media: None,
            remote_media: None,
            pending_offer: None,
            pending_reply: None,
            ring_timer,
        });

        call_id
    }

    fn wire_peer(&self, peer: &PeerSession, call_id: u64) {
        let commands = self.commands.clone();
        peer.on_connection_state_change(Arc::new(move |state: ConnectionState| {
            let _ = commands.send(Command::Transport {
                call_id,
                event: TransportEvent::StateChanged(state),
            });
        }));

        let commands = self.commands.clone();
        peer.on_remote_track(Arc::new(move |stream_id: String, track: Arc<dyn MediaTrack>| {
            let _ = commands.send(Command::Transport {
                call_id,
                event: TransportEvent::RemoteTrack { stream_id, track },
            });
        }));

        let commands = self.commands.clone();
        peer.on_local_candidate(Arc::new(move |candidate: IceCandidate| {
            let _ = commands.send(Command::Transport {
                call_id,
                event: TransportEvent::LocalCandidate(candidate),
            });
        }));
    }

    /// Release every resource of the active call and return to idle
    ///
    /// The first caller takes the call; later calls are no-ops.
    async fn teardown(&mut self, reason: EndReason) {
        let Some(mut call) = self.call.take() else {
            return;
        };

        if let Some(timer) = call.ring_timer.take() {
            timer.abort();
        }

        if let Err(e) = call.peer.close().await {
            warn!(call_id = call.id, "Error closing peer session: {}", e);
        }

        if let Some(media) = call.local_media.take() {
            media.release();
        }
        call.remote_media = None;

        if let Some(reply) = call.pending_reply.take() {
            let _ = reply.send(Err(Error::CallEnded(format!(
                "Call with {} ended: {}",
                call.remote_user_id, reason
            ))));
        }

        info!(
            call_id = call.id,
            remote_user_id = %call.remote_user_id,
            "Call ended: {}", reason
        );

        self.set_state(CallState::Idle);
        self.publish(CallEvent::Ended {
            remote_user_id: call.remote_user_id,
            reason,
        });
    }

    // ---- helpers ----

    fn is_active(&self, call_id: u64) -> bool {
        matches!(&self.call, Some(call) if call.id == call_id)
    }

    fn active_call(&mut self) -> Result<&mut CallSession> {
        self.call
            .as_mut()
            .ok_or_else(|| Error::CallEnded("No active call".to_string()))
    }

    fn active_remote(&self) -> Option<UserId> {
        self.call.as_ref().map(|call| call.remote_user_id.clone())
    }

    fn active_remote_and_role(&self) -> Option<(UserId, CallRole)> {
        self.call
            .as_ref()
            .map(|call| (call.remote_user_id.clone(), call.role))
    }

    async fn send_peer_signal(&self, to_user_id: &str, event: SignalEvent) {
        match serde_json::to_value(PeerPayload::default()) {
            Ok(payload) => {
                self.send_signal(to_user_id, event, payload).await;
            }
            Err(e) => warn!("Failed to encode {}: {}", event, e),
        }
    }

    /// Send a signal; failures are logged and dropped
    async fn send_signal(
        &self,
        to_user_id: &str,
        event: SignalEvent,
        payload: serde_json::Value,
    ) -> bool {
        match self.channel.send(to_user_id, event, payload).await {
            Ok(()) => {
                debug!("Sent {} to {}", event, to_user_id);
                true
            }
            Err(e) => {
                warn!("Dropping {} to {}: {}", event, to_user_id, e);
                false
            }
        }
    }

    fn set_state(&self, state: CallState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!("Call state: {} -> {}", previous, state);
            self.publish(CallEvent::StateChanged(state));
        }
    }

    fn publish(&self, event: CallEvent) {
        // No subscribers is fine
        let _ = self.events_tx.send(event);
    }
}
