//! [`RtcTransport`] over webrtc-rs
//!
//! Data channel only: no media tracks are negotiated. Path candidates travel
//! as `RTCIceCandidateInit` JSON.

use super::transport::{
    ConnectionState, EventSink, Role, RtcTransport, SdpKind, TransportFactory,
};
use crate::config::PeerLinkConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

/// Creates [`WebRtcTransport`]s configured with the link's STUN servers
#[derive(Debug, Clone)]
pub struct WebRtcTransportFactory {
    stun_servers: Vec<String>,
}

impl WebRtcTransportFactory {
    pub fn new(config: &PeerLinkConfig) -> Self {
        Self {
            stun_servers: config.stun_servers.clone(),
        }
    }
}

#[async_trait]
impl TransportFactory for WebRtcTransportFactory {
    async fn create(&self, role: Role, sink: EventSink) -> Result<Arc<dyn RtcTransport>> {
        let transport = WebRtcTransport::new(role, &self.stun_servers, sink).await?;
        Ok(Arc::new(transport))
    }
}

/// One webrtc-rs peer connection plus its application data channel
pub struct WebRtcTransport {
    role: Role,
    peer_connection: Arc<RTCPeerConnection>,
    data_channel: Arc<RwLock<Option<Arc<RTCDataChannel>>>>,
    sink: EventSink,
}

impl WebRtcTransport {
    /// Build the peer connection and register its event handlers
    #[instrument(skip(stun_servers, sink), fields(connection_id = %sink.connection_id()))]
    pub async fn new(role: Role, stun_servers: &[String], sink: EventSink) -> Result<Self> {
        let api = APIBuilder::new()
            .with_media_engine(MediaEngine::default())
            .build();

        let ice_servers: Vec<RTCIceServer> = stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .collect();

        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let peer_connection =
            Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
                Error::WebRtcError(format!("Failed to create peer connection: {}", e))
            })?);

        let transport = Self {
            role,
            peer_connection,
            data_channel: Arc::new(RwLock::new(None)),
            sink,
        };
        transport.register_handlers();

        info!("Created {} transport", role);
        Ok(transport)
    }

    fn register_handlers(&self) {
        let sink = self.sink.clone();
        self.peer_connection
            .on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                let sink = sink.clone();
                Box::pin(async move {
                    let state = match s {
                        RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => {
                            ConnectionState::New
                        }
                        RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
                        RTCPeerConnectionState::Connected => ConnectionState::Connected,
                        RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
                        RTCPeerConnectionState::Failed => ConnectionState::Failed,
                        RTCPeerConnectionState::Closed => ConnectionState::Closed,
                    };
                    debug!("Peer connection state: {:?}", state);
                    sink.state_changed(state);
                })
            }));

        let sink = self.sink.clone();
        self.peer_connection
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let sink = sink.clone();
                Box::pin(async move {
                    // None marks the end of gathering
                    let Some(candidate) = candidate else {
                        return;
                    };
                    let serialized = candidate
                        .to_json()
                        .map_err(|e| e.to_string())
                        .and_then(|init| serde_json::to_string(&init).map_err(|e| e.to_string()));
                    match serialized {
                        Ok(json) => sink.candidate(json),
                        Err(e) => warn!("Failed to serialize local candidate: {}", e),
                    }
                })
            }));

        if self.role == Role::Host {
            let sink = self.sink.clone();
            let slot = Arc::clone(&self.data_channel);
            self.peer_connection
                .on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
                    let sink = sink.clone();
                    let slot = Arc::clone(&slot);
                    Box::pin(async move {
                        info!("Inbound data channel '{}'", channel.label());
                        wire_channel(&channel, &sink);
                        *slot.write().await = Some(channel);
                    })
                }));
        }
    }

    async fn channel(&self) -> Result<Arc<RTCDataChannel>> {
        self.data_channel
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::DataChannelError("No data channel yet".to_string()))
    }
}

fn wire_channel(channel: &Arc<RTCDataChannel>, sink: &EventSink) {
    let label = channel.label().to_string();

    let open_sink = sink.clone();
    let open_label = label.clone();
    channel.on_open(Box::new(move || {
        let sink = open_sink.clone();
        let label = open_label.clone();
        Box::pin(async move {
            debug!("Data channel '{}' opened", label);
            sink.channel_open();
        })
    }));

    let close_sink = sink.clone();
    let close_label = label.clone();
    channel.on_close(Box::new(move || {
        let sink = close_sink.clone();
        let label = close_label.clone();
        Box::pin(async move {
            debug!("Data channel '{}' closed", label);
            sink.channel_closed();
        })
    }));

    let error_label = label;
    channel.on_error(Box::new(move |err: webrtc::Error| {
        let label = error_label.clone();
        Box::pin(async move {
            error!("Data channel '{}' error: {}", label, err);
        })
    }));

    let message_sink = sink.clone();
    channel.on_message(Box::new(move |msg: DataChannelMessage| {
        let sink = message_sink.clone();
        Box::pin(async move {
            if !msg.is_string {
                warn!("Ignoring binary data channel message ({} bytes)", msg.data.len());
                return;
            }
            match String::from_utf8(msg.data.to_vec()) {
                Ok(text) => sink.message(text),
                Err(e) => warn!("Dropping non UTF-8 data channel message: {}", e),
            }
        })
    }));
}

#[async_trait]
impl RtcTransport for WebRtcTransport {
    async fn create_data_channel(&self, label: &str, ordered: bool) -> Result<()> {
        let init = RTCDataChannelInit {
            ordered: Some(ordered),
            ..Default::default()
        };

        let channel = self
            .peer_connection
            .create_data_channel(label, Some(init))
            .await
            .map_err(|e| {
                Error::DataChannelError(format!("Failed to create data channel: {}", e))
            })?;

        wire_channel(&channel, &self.sink);
        *self.data_channel.write().await = Some(channel);
        Ok(())
    }

    async fn create_offer(&self) -> Result<String> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create offer: {}", e)))?;

        self.peer_connection
            .set_local_description(offer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))?;

        let local_desc = self
            .peer_connection
            .local_description()
            .await
            .ok_or_else(|| {
                Error::SdpError("No local description after setting offer".to_string())
            })?;

        Ok(local_desc.sdp)
    }

    async fn create_answer(&self) -> Result<String> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create answer: {}", e)))?;

        self.peer_connection
            .set_local_description(answer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))?;

        let local_desc = self
            .peer_connection
            .local_description()
            .await
            .ok_or_else(|| {
                Error::SdpError("No local description after setting answer".to_string())
            })?;

        Ok(local_desc.sdp)
    }

    async fn set_remote_description(&self, kind: SdpKind, sdp: &str) -> Result<()> {
        let description = match kind {
            SdpKind::Offer => RTCSessionDescription::offer(sdp.to_string()),
            SdpKind::Answer => RTCSessionDescription::answer(sdp.to_string()),
        }
        .map_err(|e| Error::SdpError(format!("Failed to parse {:?}: {}", kind, e)))?;

        self.peer_connection
            .set_remote_description(description)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))
    }

    async fn add_ice_candidate(&self, candidate: &str) -> Result<()> {
        let init: RTCIceCandidateInit = serde_json::from_str(candidate).map_err(|e| {
            Error::IceCandidateError(format!("Failed to parse ICE candidate: {}", e))
        })?;

        self.peer_connection
            .add_ice_candidate(init)
            .await
            .map_err(|e| Error::IceCandidateError(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn send(&self, text: &str) -> Result<()> {
        let channel = self.channel().await?;
        channel
            .send_text(text.to_string())
            .await
            .map(|_| ())
            .map_err(|e| Error::DataChannelError(format!("Failed to send: {}", e)))
    }

    async fn close(&self) -> Result<()> {
        if let Some(channel) = self.data_channel.write().await.take() {
            if let Err(e) = channel.close().await {
                debug!("Data channel close: {}", e);
            }
        }

        self.peer_connection
            .close()
            .await
            .map_err(|e| Error::WebRtcError(format!("Failed to close connection: {}", e)))
    }
}
