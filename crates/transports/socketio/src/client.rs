//! Socket.io signaling client
//!
//! Speaks Engine.IO v4 over a single WebSocket (no long-polling fallback) and
//! exposes the relay as a [`SignalingChannel`].

use crate::config::SignalingConfig;
use crate::packet::Packet;
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use peercall_core::signaling::address_payload;
use peercall_core::{
    Error, InboundSignal, Result, SignalEvent, SignalHandler, SignalingChannel, SubscriptionId,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, instrument, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;

/// Registered inbound handlers
#[derive(Default)]
struct HandlerTable {
    next_id: AtomicU64,
    entries: RwLock<Vec<(SubscriptionId, SignalEvent, SignalHandler)>>,
}

impl HandlerTable {
    fn insert(&self, event: SignalEvent, handler: SignalHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.write().push((id, event, handler));
        id
    }

    fn remove(&self, subscription: SubscriptionId) {
        self.entries.write().retain(|(id, _, _)| *id != subscription);
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Invoke every handler for the signal's event outside the lock
    fn dispatch(&self, signal: InboundSignal) {
        let handlers: Vec<SignalHandler> = self
            .entries
            .read()
            .iter()
            .filter(|(_, event, _)| *event == signal.event)
            .map(|(_, _, handler)| handler.clone())
            .collect();

        if handlers.is_empty() {
            debug!("No handler for {}", signal.event);
        }

        for handler in handlers {
            handler(signal.clone());
        }
    }
}

/// One established relay session
struct Link {
    sid: String,
    outbound: mpsc::UnboundedSender<Message>,
    sender: JoinHandle<()>,
}

/// State shared between the client and its supervisor task
struct Shared {
    config: SignalingConfig,
    handlers: Arc<HandlerTable>,
    connected: AtomicBool,
    link: Mutex<Option<Link>>,
}

impl Shared {
    /// Start the sender task for a fresh session and publish it
    fn attach(&self, write: WsWrite, sid: String) -> mpsc::UnboundedSender<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        let sender = tokio::spawn(SocketIoSignaling::sender_task(write, rx));

        let link = Link {
            sid,
            outbound: tx.clone(),
            sender,
        };
        if let Some(previous) = self.link.lock().replace(link) {
            previous.sender.abort();
        }
        self.connected.store(true, Ordering::SeqCst);
        tx
    }

    /// Forget the current session; its sender drains and exits
    fn detach(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.link.lock().take();
    }
}

/// Signaling channel backed by a socket.io relay
///
/// After the relay drops the connection the client reconnects with
/// exponential backoff (unless `reconnect` is off). Registered handlers are
/// kept across reconnects; sends during the gap fail with
/// `SignalingUnavailable`.
pub struct SocketIoSignaling {
    shared: Arc<Shared>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl SocketIoSignaling {
    /// Create a disconnected client
    pub fn new(config: SignalingConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                handlers: Arc::new(HandlerTable::default()),
                connected: AtomicBool::new(false),
                link: Mutex::new(None),
            }),
            supervisor: Mutex::new(None),
        })
    }

    /// Connection settings
    pub fn config(&self) -> &SignalingConfig {
        &self.shared.config
    }

    /// Engine.IO session id of the live connection
    pub fn sid(&self) -> Option<String> {
        self.shared.link.lock().as_ref().map(|link| link.sid.clone())
    }

    /// Number of registered inbound handlers
    pub fn handler_count(&self) -> usize {
        self.shared.handlers.len()
    }

    /// Connect and authenticate against the relay
    ///
    /// Completes once the relay acknowledges the Socket.IO CONNECT. Already
    /// connected clients return immediately. Handlers registered before or
    /// after connecting are kept across reconnects.
    #[instrument(skip(self), fields(url = %self.shared.config.url))]
    pub async fn connect(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        let (write, read, sid) = open_session(&self.shared.config).await?;
        info!(sid = %sid, "Connected to signaling relay");

        let outbound = self.shared.attach(write, sid);
        let supervisor = tokio::spawn(Self::supervise(self.shared.clone(), read, outbound));
        if let Some(previous) = self.supervisor.lock().replace(supervisor) {
            previous.abort();
        }

        Ok(())
    }

    /// Leave the namespace and close the socket
    pub async fn disconnect(&self) {
        if let Some(supervisor) = self.supervisor.lock().take() {
            supervisor.abort();
        }

        let link = self.shared.link.lock().take();
        self.shared.connected.store(false, Ordering::SeqCst);

        if let Some(link) = link {
            let _ = link.outbound.send(Message::Text(Packet::Disconnect.encode()));
            let _ = link.outbound.send(Message::Close(None));
            drop(link.outbound);

            // Sender drains the queued frames then exits
            if let Err(e) = link.sender.await {
                if !e.is_cancelled() {
                    warn!("Signaling sender task failed: {}", e);
                }
            }
            info!(sid = %link.sid, "Disconnected from signaling relay");
        }
    }

    /// Supervisor task: runs the receive loop and reconnects when it ends
    async fn supervise(
        shared: Arc<Shared>,
        mut read: WsRead,
        mut outbound: mpsc::UnboundedSender<Message>,
    ) {
        loop {
            Self::receiver_task(read, outbound, shared.handlers.clone()).await;
            shared.detach();

            if !shared.config.reconnect {
                warn!("Lost connection to signaling relay");
                break;
            }

            warn!("Lost connection to signaling relay, reconnecting");
            let mut attempt = 0u32;
            let (write, next_read, sid) = loop {
                tokio::time::sleep(shared.config.reconnect_delay(attempt)).await;
                match open_session(&shared.config).await {
                    Ok(session) => break session,
                    Err(e) => {
                        attempt = attempt.saturating_add(1);
                        warn!(attempt, "Reconnect to signaling relay failed: {}", e);
                    }
                }
            };

            info!(sid = %sid, attempt, "Reconnected to signaling relay");
            outbound = shared.attach(write, sid);
            read = next_read;
        }

        debug!("Signaling supervisor terminated");
    }

    /// Sender task: forwards queued frames to the WebSocket
    async fn sender_task(mut write: WsWrite, mut rx: mpsc::UnboundedReceiver<Message>) {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if let Err(e) = write.send(msg).await {
                error!("Failed to send WebSocket message: {}", e);
                break;
            }
            if closing {
                break;
            }
        }

        debug!("Signaling sender task terminated");
    }

    /// Receiver task: answers heartbeats and dispatches events
    async fn receiver_task(
        mut read: WsRead,
        outbound: mpsc::UnboundedSender<Message>,
        handlers: Arc<HandlerTable>,
    ) {
        while let Some(msg_result) = read.next().await {
            match msg_result {
                Ok(Message::Text(text)) => match Packet::decode(&text) {
                    Ok(Packet::Ping) => {
                        let _ = outbound.send(Message::Text(Packet::Pong.encode()));
                    }
                    Ok(Packet::Event { name, payload }) => match SignalEvent::from_name(&name) {
                        Some(event) => {
                            debug!("Received {}", event);
                            handlers.dispatch(InboundSignal { event, payload });
                        }
                        None => debug!("Ignoring relay event {}", name),
                    },
                    Ok(Packet::Disconnect) | Ok(Packet::Close) => {
                        info!("Relay ended the session");
                        break;
                    }
                    Ok(Packet::Namespaced { namespace, .. }) => {
                        debug!("Ignoring packet for namespace {}", namespace)
                    }
                    Ok(other) => debug!("Ignoring {:?}", other),
                    Err(e) => warn!("Failed to decode relay packet: {}", e),
                },
                Ok(Message::Close(_)) => {
                    info!("Signaling WebSocket closed");
                    break;
                }
                Err(e) => {
                    error!("Signaling WebSocket error: {}", e);
                    break;
                }
                _ => {}
            }
        }

        debug!("Signaling receiver task terminated");
    }
}

/// Open the socket and complete the Engine.IO + Socket.IO handshake
async fn open_session(config: &SignalingConfig) -> Result<(WsWrite, WsRead, String)> {
    let url = config.websocket_url()?;
    debug!("Connecting to signaling relay: {}", url);

    tokio::time::timeout(config.connect_timeout(), handshake(config, url.as_str()))
        .await
        .map_err(|_| {
            Error::SignalingUnavailable(format!(
                "Timed out after {:?} connecting to {}",
                config.connect_timeout(),
                url
            ))
        })?
}

async fn handshake(config: &SignalingConfig, url: &str) -> Result<(WsWrite, WsRead, String)> {
    let (ws_stream, _) = connect_async(url)
        .await
        .map_err(|e| Error::SignalingUnavailable(format!("Failed to connect: {}", e)))?;

    let (mut write, mut read) = ws_stream.split();

    let open = match next_packet(&mut read).await? {
        Packet::Open(handshake) => handshake,
        other => {
            return Err(Error::SignalingError(format!(
                "Expected Engine.IO open packet, got {:?}",
                other
            )))
        }
    };
    debug!(
        sid = %open.sid,
        ping_interval = open.ping_interval,
        ping_timeout = open.ping_timeout,
        "Engine.IO session opened"
    );

    let auth = config.token.as_ref().map(|token| json!({ "token": token }));
    send_packet(&mut write, Packet::Connect(auth)).await?;

    loop {
        match next_packet(&mut read).await? {
            Packet::Connect(_) => break,
            Packet::ConnectError(data) => {
                return Err(Error::SignalingUnavailable(format!(
                    "Relay rejected connection: {}",
                    connect_error_message(&data)
                )))
            }
            Packet::Ping => send_packet(&mut write, Packet::Pong).await?,
            other => debug!("Ignoring {:?} during handshake", other),
        }
    }

    Ok((write, read, open.sid))
}

async fn next_packet(read: &mut WsRead) -> Result<Packet> {
    loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => return Packet::decode(&text),
            Some(Ok(Message::Close(_))) | None => {
                return Err(Error::SignalingUnavailable(
                    "Relay closed the connection during handshake".to_string(),
                ))
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                return Err(Error::SignalingUnavailable(format!(
                    "WebSocket error: {}",
                    e
                )))
            }
        }
    }
}

async fn send_packet(write: &mut WsWrite, packet: Packet) -> Result<()> {
    write
        .send(Message::Text(packet.encode()))
        .await
        .map_err(|e| Error::SignalingUnavailable(format!("Failed to send: {}", e)))
}

fn connect_error_message(data: &Value) -> String {
    data.get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| data.to_string())
}

#[async_trait]
impl SignalingChannel for SocketIoSignaling {
    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    async fn send(&self, to_user_id: &str, event: SignalEvent, payload: Value) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::SignalingUnavailable(format!(
                "Not connected, dropping {}",
                event
            )));
        }

        let frame = Packet::event(event.as_str(), address_payload(to_user_id, payload)).encode();
        let guard = self.shared.link.lock();
        let link = guard
            .as_ref()
            .ok_or_else(|| Error::SignalingUnavailable("Not connected".to_string()))?;

        link.outbound
            .send(Message::Text(frame))
            .map_err(|_| Error::SignalingUnavailable("Signaling sender stopped".to_string()))?;

        debug!("Sent {} to {}", event, to_user_id);
        Ok(())
    }

    fn on_event(&self, event: SignalEvent, handler: SignalHandler) -> SubscriptionId {
        self.shared.handlers.insert(event, handler)
    }

    fn off(&self, subscription: SubscriptionId) {
        self.shared.handlers.remove(subscription);
    }
}

impl Drop for SocketIoSignaling {
    fn drop(&mut self) {
        if let Some(supervisor) = self.supervisor.lock().take() {
            supervisor.abort();
        }
        if let Some(link) = self.shared.link.lock().take() {
            link.sender.abort();
        }
    }
}
