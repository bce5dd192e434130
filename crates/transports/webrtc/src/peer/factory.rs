//! Transport factory building peer connections from one shared API object

use super::connection::WebRtcPeerTransport;
use async_trait::async_trait;
use peercall_core::{
    Error, PeerTransport, Result, TransportConfig, TransportEventHandler, TransportFactory,
};
use std::sync::Arc;
use tracing::{info, instrument};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;

/// Creates [`WebRtcPeerTransport`]s
///
/// Codecs (Opus, VP8/VP9/H.264) and the default interceptors are registered
/// once; every call gets a fresh peer connection.
pub struct WebRtcTransportFactory {
    api: API,
}

impl WebRtcTransportFactory {
    /// Build the WebRTC API with default codecs and interceptors
    pub fn new() -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry = register_default_interceptors(Default::default(), &mut media_engine)
            .map_err(|e| Error::WebRtcError(format!("Failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        Ok(Self { api })
    }
}

/// Convert configured ICE servers into webrtc's form
pub fn rtc_configuration(config: &TransportConfig) -> RTCConfiguration {
    let ice_servers = config
        .ice_servers
        .iter()
        .map(|server| {
            #[allow(clippy::needless_update)]
            RTCIceServer {
                urls: server.urls.clone(),
                username: server.username.clone().unwrap_or_default(),
                credential: server.credential.clone().unwrap_or_default(),
                ..Default::default()
            }
        })
        .collect();

    RTCConfiguration {
        ice_servers,
        ..Default::default()
    }
}

#[async_trait]
impl TransportFactory for WebRtcTransportFactory {
    #[instrument(skip_all, fields(ice_servers = config.ice_servers.len()))]
    async fn create(
        &self,
        config: &TransportConfig,
        on_event: TransportEventHandler,
    ) -> Result<Arc<dyn PeerTransport>> {
        let peer_connection = Arc::new(
            self.api
                .new_peer_connection(rtc_configuration(config))
                .await
                .map_err(|e| {
                    Error::WebRtcError(format!("Failed to create peer connection: {}", e))
                })?,
        );

        let transport = WebRtcPeerTransport::new(peer_connection, on_event);
        info!("Created peer connection {}", transport.connection_id());

        Ok(Arc::new(transport))
    }
}
