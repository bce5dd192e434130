//! peercall command-line client
//!
//! Connects to a socket.io chat relay and places or answers one-to-one calls
//! over WebRTC. Local audio is fed with Opus silence frames so the remote side
//! receives a live track.
//!
//! # Usage
//!
//! ```bash
//! # Wait for incoming calls (answers automatically)
//! peercall --signaling-url https://chat.example.com --token $JWT listen
//!
//! # Call a user, audio only, giving up after 30s of ringing
//! peercall --signaling-url https://chat.example.com --token $JWT \
//!   --audio-only --ring-timeout 30 call 64f1c2
//!
//! # Load ICE servers and media defaults from a TOML file
//! PEERCALL_CONFIG=./peercall.toml peercall listen
//! ```

use anyhow::Context;
use bytes::Bytes;
use clap::{Parser, Subcommand};
use peercall_core::{
    CallConfig, CallController, CallEvent, MediaKind, MediaTrack, MediaView, SignalingChannel,
};
use peercall_socketio::{SignalingConfig, SocketIoSignaling};
use peercall_webrtc::media::{OPUS_FRAME_DURATION, OPUS_SILENCE_FRAME};
use peercall_webrtc::{SampleTrack, SampleTrackSource, WebRtcTransportFactory};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// peercall
///
/// One-to-one WebRTC calls negotiated through a socket.io relay.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Relay base URL (http, https, ws or wss)
    #[arg(
        long,
        default_value = "http://localhost:3000",
        env = "PEERCALL_SIGNALING_URL"
    )]
    signaling_url: String,

    /// Auth token sent with the socket.io CONNECT
    #[arg(long, env = "PEERCALL_TOKEN")]
    token: Option<String>,

    /// TOML file with call settings
    #[arg(long, env = "PEERCALL_CONFIG")]
    config: Option<PathBuf>,

    /// STUN servers (comma-separated, overrides the config file)
    #[arg(long, value_delimiter = ',', env = "PEERCALL_STUN_SERVERS")]
    stun_servers: Vec<String>,

    /// Seconds to ring before giving up (0 disables the timeout)
    #[arg(long, env = "PEERCALL_RING_TIMEOUT")]
    ring_timeout: Option<u64>,

    /// Do not request a video track
    #[arg(long, default_value_t = false, env = "PEERCALL_AUDIO_ONLY")]
    audio_only: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
enum Command {
    /// Call a user and exit when the call ends
    Call {
        /// Relay user id of the callee
        user: String,
    },
    /// Answer incoming calls until interrupted
    Listen,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("peercall-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args))
}

async fn async_main(args: Args) -> anyhow::Result<()> {
    init_tracing();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        signaling_url = %args.signaling_url,
        "peercall starting"
    );

    let config = call_config(&args)?;
    info!(
        stun_servers = config.stun_servers.len(),
        turn_servers = config.turn_servers.len(),
        audio = config.media.audio,
        video = config.media.video,
        ring_timeout_secs = ?config.ring_timeout_secs,
        "Call configuration loaded"
    );

    let signaling = Arc::new(SocketIoSignaling::new(signaling_config(&args))?);
    signaling
        .connect()
        .await
        .context("Failed to connect to the signaling relay")?;

    let transports = Arc::new(WebRtcTransportFactory::new()?);
    let media = Arc::new(SampleTrackSource::new("peercall"));
    let controller = CallController::new(config, transports, media)?;

    let channel: Arc<dyn SignalingChannel> = signaling.clone();
    controller.start(channel)?;

    let outcome = run_session(&controller, &args.command).await;

    if let Err(e) = controller.hangup().await {
        debug!("Hangup during shutdown: {}", e);
    }
    controller.stop().await?;
    signaling.disconnect().await;
    info!("peercall shut down");

    outcome
}

/// Drive one session until the call ends (call mode) or Ctrl+C
async fn run_session(controller: &CallController, command: &Command) -> anyhow::Result<()> {
    let mut events = controller.subscribe();
    let mut pumps: Vec<JoinHandle<()>> = Vec::new();

    match command {
        Command::Call { user } => {
            println!("Calling {}...", user);
            controller
                .call_user(user.as_str())
                .await
                .with_context(|| format!("Call to {} failed", user))?;
        }
        Command::Listen => println!("Waiting for calls. Press Ctrl+C to exit."),
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Ctrl+C received, hanging up");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => {
                    let ended = matches!(event, CallEvent::Ended { .. });
                    report(&event, &mut pumps);

                    if ended {
                        stop_pumps(&mut pumps);
                        if matches!(command, Command::Call { .. }) {
                            break;
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!("Missed {} call events", skipped),
                Err(RecvError::Closed) => {
                    error!("Call controller stopped");
                    break;
                }
            }
        }
    }

    stop_pumps(&mut pumps);
    Ok(())
}

fn report(event: &CallEvent, pumps: &mut Vec<JoinHandle<()>>) {
    match event {
        CallEvent::StateChanged(state) => debug!("Call state: {}", state),
        CallEvent::Incoming { remote_user_id } => println!("Incoming call from {}", remote_user_id),
        CallEvent::LocalMedia(view) => {
            println!("Local media ready ({})", describe(view));
            pumps.extend(view.tracks.iter().cloned().filter_map(spawn_silence_pump));
        }
        CallEvent::RemoteMedia {
            remote_user_id,
            media,
        } => println!("Receiving from {}: {}", remote_user_id, describe(media)),
        CallEvent::Connected { remote_user_id } => println!("Connected to {}", remote_user_id),
        CallEvent::Ended {
            remote_user_id,
            reason,
        } => {
            if reason.is_failure() {
                println!("Call with {} failed: {}", remote_user_id, reason);
            } else {
                println!("Call with {} ended: {}", remote_user_id, reason);
            }
        }
    }
}

fn describe(view: &MediaView) -> String {
    let kinds: Vec<String> = view
        .tracks
        .iter()
        .map(|track| format!("{:?}", track.kind()).to_lowercase())
        .collect();
    format!("{} [{}]", view.stream_id, kinds.join(", "))
}

/// Feed Opus silence into a local audio track until it stops
fn spawn_silence_pump(track: Arc<dyn MediaTrack>) -> Option<JoinHandle<()>> {
    if track.kind() != MediaKind::Audio || track.as_any().downcast_ref::<SampleTrack>().is_none() {
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(OPUS_FRAME_DURATION);
        loop {
            ticker.tick().await;

            let Some(sample_track) = track.as_any().downcast_ref::<SampleTrack>() else {
                break;
            };
            if let Err(e) = sample_track
                .write_sample(Bytes::from_static(&OPUS_SILENCE_FRAME), OPUS_FRAME_DURATION)
                .await
            {
                debug!("Silence pump for {} stopped: {}", track.id(), e);
                break;
            }
        }
    }))
}

fn stop_pumps(pumps: &mut Vec<JoinHandle<()>>) {
    for pump in pumps.drain(..) {
        pump.abort();
    }
}

/// Merge the config file (if any) with command-line overrides
fn call_config(args: &Args) -> anyhow::Result<CallConfig> {
    let mut config = match &args.config {
        Some(path) => CallConfig::from_toml_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => CallConfig::default(),
    };

    if !args.stun_servers.is_empty() {
        config.stun_servers = args.stun_servers.clone();
    }

    if let Some(secs) = args.ring_timeout {
        config.ring_timeout_secs = (secs > 0).then_some(secs);
    }

    if args.audio_only {
        config.media.video = false;
    }

    config.validate()?;
    Ok(config)
}

fn signaling_config(args: &Args) -> SignalingConfig {
    let config = SignalingConfig::new(args.signaling_url.clone());
    match &args.token {
        Some(token) => config.with_token(token.clone()),
        None => config,
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
