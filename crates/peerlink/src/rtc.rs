//! WebRTC connectivity agent
//!
//! Wraps the webrtc crate to implement [`ConnectivityAgent`] for
//! production use. The peer connection's callbacks are forwarded into
//! the agent's event stream; the data channel is created unordered with
//! no retransmissions, matching the session's best-effort contract.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, warn};

use crate::transport::{AgentEvent, ChannelEvent, ConnectivityAgent, DataChannel, TransportError};
use crate::types::{ChannelState, IceCandidate, SdpKind, SessionConfig, SessionDescription};

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
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

/// Wrapper around RTCDataChannel implementing our [`DataChannel`] trait
struct RtcChannel {
    dc: Arc<RTCDataChannel>,
    events: Mutex<mpsc::Receiver<ChannelEvent>>,
}

impl RtcChannel {
    fn new(dc: Arc<RTCDataChannel>) -> Arc<Self> {
        let (event_tx, event_rx) = mpsc::channel(64);

        let tx = event_tx.clone();
        dc.on_open(Box::new(move || {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(ChannelEvent::Open).await;
            })
        }));

        let tx = event_tx.clone();
        dc.on_close(Box::new(move || {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(ChannelEvent::Closed).await;
            })
        }));

        let tx = event_tx;
        dc.on_message(Box::new(move |message: DataChannelMessage| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(ChannelEvent::Message(message.data)).await;
            })
        }));

        Arc::new(Self {
            dc,
            events: Mutex::new(event_rx),
        })
    }
}

#[async_trait]
impl DataChannel for RtcChannel {
    async fn send(&self, data: Bytes) -> Result<(), TransportError> {
        self.dc
            .send(&data)
            .await
            .map(|_| ())
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    fn ready_state(&self) -> ChannelState {
        match self.dc.ready_state() {
            RTCDataChannelState::Connecting => ChannelState::Connecting,
            RTCDataChannelState::Open => ChannelState::Open,
            _ => ChannelState::Closed,
        }
    }

    async fn buffered_amount(&self) -> usize {
        self.dc.buffered_amount().await
    }

    async fn next_event(&self) -> Option<ChannelEvent> {
        self.events.lock().await.recv().await
    }

    async fn close(&self) {
        if let Err(err) = self.dc.close().await {
            debug!("[RtcAgent] channel close: {err}");
        }
    }
}

/// Connectivity agent backed by a real RTCPeerConnection
pub struct WebRtcAgent {
    connection: Arc<RTCPeerConnection>,
    channel_label: String,
    event_rx: Mutex<mpsc::Receiver<AgentEvent>>,
    closed_tx: watch::Sender<bool>,
}

impl WebRtcAgent {
    pub async fn new(config: &SessionConfig) -> Result<Self, TransportError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: config.stun_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };

        let connection = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?,
        );

        let (event_tx, event_rx) = mpsc::channel(64);

        let tx = event_tx.clone();
        connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let tx = tx.clone();
            Box::pin(async move {
                // None marks the end of gathering; there is nothing to forward
                let Some(candidate) = candidate else { return };
                let init = match candidate.to_json() {
                    Ok(init) => init,
                    Err(err) => {
                        warn!("[RtcAgent] failed to serialize candidate: {err}");
                        return;
                    }
                };
                let _ = tx
                    .send(AgentEvent::CandidateDiscovered(IceCandidate {
                        candidate: init.candidate,
                        sdp_m_line_index: init.sdp_mline_index,
                        sdp_mid: init.sdp_mid,
                    }))
                    .await;
            })
        }));

        let tx = event_tx;
        let label = config.channel_label.clone();
        connection.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let tx = tx.clone();
            let label = label.clone();
            Box::pin(async move {
                if dc.label() != label {
                    debug!("[RtcAgent] ignoring channel with label {}", dc.label());
                    return;
                }
                let channel: Arc<dyn DataChannel> = RtcChannel::new(dc);
                let _ = tx.send(AgentEvent::ChannelSurfaced(channel)).await;
            })
        }));

        Ok(Self {
            connection,
            channel_label: config.channel_label.clone(),
            event_rx: Mutex::new(event_rx),
            closed_tx: watch::channel(false).0,
        })
    }
}

#[async_trait]
impl ConnectivityAgent for WebRtcAgent {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        let offer = self
            .connection
            .create_offer(None)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        let answer = self
            .connection
            .create_answer(None)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        let desc = rebuild_description(desc)?;
        self.connection
            .set_local_description(desc)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        let desc = rebuild_description(desc)?;
        self.connection
            .set_remote_description(desc)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))
    }

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_m_line_index,
            ..Default::default()
        };
        self.connection
            .add_ice_candidate(init)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))
    }

    async fn create_data_channel(&self) -> Result<Arc<dyn DataChannel>, TransportError> {
        // Unordered, no retransmissions: lowest latency, staleness
        // beats ordering for the payloads this channel carries.
        let init = RTCDataChannelInit {
            ordered: Some(false),
            max_retransmits: Some(0),
            ..Default::default()
        };
        let dc = self
            .connection
            .create_data_channel(&self.channel_label, Some(init))
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        let channel: Arc<dyn DataChannel> = RtcChannel::new(dc);
        Ok(channel)
    }

    async fn next_event(&self) -> Option<AgentEvent> {
        let mut rx = self.event_rx.lock().await;
        let mut closed = self.closed_tx.subscribe();
        tokio::select! {
            event = rx.recv() => event,
            _ = async {
                while !*closed.borrow_and_update() {
                    if closed.changed().await.is_err() {
                        return;
                    }
                }
            } => None,
        }
    }

    async fn close(&self) {
        if let Err(err) = self.connection.close().await {
            debug!("[RtcAgent] connection close: {err}");
        }
        let _ = self.closed_tx.send(true);
    }
}

fn rebuild_description(desc: SessionDescription) -> Result<RTCSessionDescription, TransportError> {
    match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp),
    }
    .map_err(|e| TransportError::ConnectionFailed(e.to_string()))
}
