//! WebRTC peer connection carrying the file-transfer data channel

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use super::types::DATA_CHANNEL_LABEL;
use crate::error::Error;
use crate::transfer::{DataFrame, FrameSink};

/// Events raised by the transport, consumed by the session driver
pub enum PeerEvent {
    LocalCandidate(Value),
    ChannelOpen(Arc<dyn FrameSink>),
    Frame(DataFrame),
    ChannelClosed,
    ChannelError(String),
    ConnectionFailed,
}

impl std::fmt::Debug for PeerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerEvent::LocalCandidate(c) => f.debug_tuple("LocalCandidate").field(c).finish(),
            PeerEvent::ChannelOpen(_) => write!(f, "ChannelOpen"),
            PeerEvent::Frame(frame) => f.debug_tuple("Frame").field(frame).finish(),
            PeerEvent::ChannelClosed => write!(f, "ChannelClosed"),
            PeerEvent::ChannelError(e) => f.debug_tuple("ChannelError").field(e).finish(),
            PeerEvent::ConnectionFailed => write!(f, "ConnectionFailed"),
        }
    }
}

/// Descriptor and candidate operations the orchestrator drives
#[async_trait]
pub trait NegotiationTransport: Send {
    /// Create the data channel and the opening descriptor
    async fn create_offer(&mut self) -> Result<Value>;
    /// Apply a remote offer and produce the answering descriptor
    async fn accept_offer(&mut self, offer: Value) -> Result<Value>;
    async fn accept_answer(&mut self, answer: Value) -> Result<()>;
    async fn add_candidate(&mut self, candidate: Value) -> Result<()>;
    async fn close(&mut self) -> Result<()>;
}

/// Data channel as a frame sink for the transfer engine
pub struct DataChannelSink {
    dc: Arc<RTCDataChannel>,
}

impl DataChannelSink {
    pub fn new(dc: Arc<RTCDataChannel>) -> Self {
        Self { dc }
    }
}

#[async_trait]
impl FrameSink for DataChannelSink {
    async fn send_text(&self, text: String) -> crate::error::Result<()> {
        self.dc
            .send_text(text)
            .await
            .map_err(|e| Error::TransferAborted(e.to_string()))?;
        Ok(())
    }

    async fn send_binary(&self, data: Bytes) -> crate::error::Result<()> {
        self.dc
            .send(&data)
            .await
            .map_err(|e| Error::TransferAborted(e.to_string()))?;
        Ok(())
    }

    async fn buffered_amount(&self) -> usize {
        self.dc.buffered_amount().await
    }

    fn is_open(&self) -> bool {
        self.dc.ready_state() == RTCDataChannelState::Open
    }
}

/// One side of the direct connection
pub struct Peer {
    pc: Arc<RTCPeerConnection>,
    data_channel: Option<Arc<RTCDataChannel>>,
    events: mpsc::Sender<PeerEvent>,
}

impl Peer {
    /// Create a peer connection using the given STUN servers
    pub async fn new(stun_servers: &[String], events: mpsc::Sender<PeerEvent>) -> Result<Self> {
        let mut m = MediaEngine::default();
        m.register_default_codecs()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut m)?;

        let api = APIBuilder::new()
            .with_media_engine(m)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers: Vec<RTCIceServer> = stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .collect();

        let config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let pc = Arc::new(api.new_peer_connection(config).await?);
        let peer = Self {
            pc,
            data_channel: None,
            events,
        };
        peer.setup_handlers();
        Ok(peer)
    }

    fn setup_handlers(&self) {
        let events = self.events.clone();
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let events = events.clone();
                Box::pin(async move {
                    let Some(c) = candidate else { return };
                    match c.to_json() {
                        Ok(init) => {
                            let _ = events.send(PeerEvent::LocalCandidate(candidate_to_json(&init))).await;
                        }
                        Err(e) => warn!("Failed to serialize local candidate: {}", e),
                    }
                })
            }));

        let events = self.events.clone();
        self.pc
            .on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                let events = events.clone();
                Box::pin(async move {
                    info!("Peer connection state: {}", state);
                    if state == RTCPeerConnectionState::Failed {
                        let _ = events.send(PeerEvent::ConnectionFailed).await;
                    }
                })
            }));

        // The responder receives the initiator's channel
        let events = self.events.clone();
        self.pc
            .on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                let events = events.clone();
                Box::pin(async move {
                    info!("Received data channel: {}", dc.label());
                    Self::setup_data_channel(dc, events).await;
                })
            }));
    }

    /// Wire channel callbacks into peer events
    async fn setup_data_channel(dc: Arc<RTCDataChannel>, events: mpsc::Sender<PeerEvent>) {
        let label = dc.label().to_string();

        let dc_for_open = dc.clone();
        let events_open = events.clone();
        dc.on_open(Box::new(move || {
            info!("Data channel '{}' open", label);
            Box::pin(async move {
                let sink: Arc<dyn FrameSink> = Arc::new(DataChannelSink::new(dc_for_open));
                let _ = events_open.send(PeerEvent::ChannelOpen(sink)).await;
            })
        }));

        let events_msg = events.clone();
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let events = events_msg.clone();
            Box::pin(async move {
                let frame = if msg.is_string {
                    DataFrame::Text(String::from_utf8_lossy(&msg.data).to_string())
                } else {
                    DataFrame::Binary(msg.data)
                };
                trace!("Data channel frame: {:?}", frame_summary(&frame));
                let _ = events.send(PeerEvent::Frame(frame)).await;
            })
        }));

        let events_close = events.clone();
        dc.on_close(Box::new(move || {
            let events = events_close.clone();
            Box::pin(async move {
                debug!("Data channel closed");
                let _ = events.send(PeerEvent::ChannelClosed).await;
            })
        }));

        let events_err = events.clone();
        dc.on_error(Box::new(move |err: webrtc::Error| {
            let events = events_err.clone();
            Box::pin(async move {
                warn!("Data channel error: {}", err);
                let _ = events.send(PeerEvent::ChannelError(err.to_string())).await;
            })
        }));

        // Incoming channels can already be open by the time we see them
        if dc.ready_state() == RTCDataChannelState::Open {
            let sink: Arc<dyn FrameSink> = Arc::new(DataChannelSink::new(dc.clone()));
            let _ = events.send(PeerEvent::ChannelOpen(sink)).await;
        }
    }
}

#[async_trait]
impl NegotiationTransport for Peer {
    async fn create_offer(&mut self) -> Result<Value> {
        let init = RTCDataChannelInit {
            ordered: Some(true),
            ..Default::default()
        };
        let dc = self.pc.create_data_channel(DATA_CHANNEL_LABEL, Some(init)).await?;
        Self::setup_data_channel(dc.clone(), self.events.clone()).await;
        self.data_channel = Some(dc);

        let offer = self.pc.create_offer(None).await?;
        self.pc.set_local_description(offer.clone()).await?;

        Ok(json!({
            "type": offer.sdp_type.to_string().to_lowercase(),
            "sdp": offer.sdp
        }))
    }

    async fn accept_offer(&mut self, offer: Value) -> Result<Value> {
        let sdp = offer
            .get("sdp")
            .and_then(|s| s.as_str())
            .ok_or_else(|| anyhow!("Missing SDP in offer"))?;

        self.pc
            .set_remote_description(RTCSessionDescription::offer(sdp.to_string())?)
            .await?;

        let answer = self.pc.create_answer(None).await?;
        self.pc.set_local_description(answer.clone()).await?;

        Ok(json!({
            "type": answer.sdp_type.to_string().to_lowercase(),
            "sdp": answer.sdp
        }))
    }

    async fn accept_answer(&mut self, answer: Value) -> Result<()> {
        let sdp = answer
            .get("sdp")
            .and_then(|s| s.as_str())
            .ok_or_else(|| anyhow!("Missing SDP in answer"))?;

        self.pc
            .set_remote_description(RTCSessionDescription::answer(sdp.to_string())?)
            .await?;
        Ok(())
    }

    async fn add_candidate(&mut self, candidate: Value) -> Result<()> {
        let Some(init) = candidate_from_json(&candidate) else {
            // End-of-candidates marker
            return Ok(());
        };
        self.pc.add_ice_candidate(init).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(dc) = self.data_channel.take() {
            let _ = dc.close().await;
        }
        self.pc.close().await?;
        Ok(())
    }
}

/// Browser-compatible JSON for a local candidate
pub fn candidate_to_json(init: &RTCIceCandidateInit) -> Value {
    json!({
        "candidate": init.candidate,
        "sdpMid": init.sdp_mid,
        "sdpMLineIndex": init.sdp_mline_index,
        "usernameFragment": init.username_fragment,
    })
}

/// Parse a remote candidate; `None` for an empty (end-of-candidates) entry
pub fn candidate_from_json(candidate: &Value) -> Option<RTCIceCandidateInit> {
    let candidate_str = candidate.get("candidate").and_then(|c| c.as_str()).unwrap_or("");
    if candidate_str.is_empty() {
        return None;
    }

    let sdp_mline_index = candidate
        .get("sdpMLineIndex")
        .or_else(|| candidate.get("sdpMlineIndex"))
        .and_then(|i| i.as_u64())
        .and_then(|i| u16::try_from(i).ok());

    Some(RTCIceCandidateInit {
        candidate: candidate_str.to_string(),
        sdp_mid: candidate.get("sdpMid").and_then(|m| m.as_str()).map(|s| s.to_string()),
        sdp_mline_index,
        username_fragment: candidate
            .get("usernameFragment")
            .and_then(|u| u.as_str())
            .map(|s| s.to_string()),
    })
}

fn frame_summary(frame: &DataFrame) -> String {
    match frame {
        DataFrame::Text(text) => text.clone(),
        DataFrame::Binary(data) => format!("<{} bytes>", data.len()),
    }
}
