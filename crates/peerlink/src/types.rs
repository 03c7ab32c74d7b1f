//! Core types for peer session negotiation
//!
//! Defines the signaling wire format exchanged through the relay,
//! session descriptions and candidates, negotiation phases, and the
//! typed event set delivered to the consumer.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Which side of the offer/answer exchange a description belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SdpKind {
    Offer,
    Answer,
}

/// An opaque descriptor of a peer's proposed connection parameters
///
/// The core never inspects the `sdp` payload; it only routes it between
/// the signaling relay and the connectivity agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// One discovered network path a peer proposes as a connection endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_m_line_index: Option<u16>,
    #[serde(rename = "sdpMid")]
    pub sdp_mid: Option<String>,
}

/// Signaling message types forwarded opaquely by the relay
///
/// Each message carries both the sender and the target identity so the
/// relay can route it without understanding the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SignalPayload {
    /// Connection offer (SDP)
    #[serde(rename = "offer")]
    Offer {
        #[serde(rename = "peerId")]
        peer_id: String,
        #[serde(rename = "targetPeerId")]
        target_peer_id: String,
        sdp: String,
    },

    /// Connection answer (SDP)
    #[serde(rename = "answer")]
    Answer {
        #[serde(rename = "peerId")]
        peer_id: String,
        #[serde(rename = "targetPeerId")]
        target_peer_id: String,
        sdp: String,
    },

    /// Single ICE candidate
    #[serde(rename = "candidate")]
    Candidate {
        #[serde(rename = "peerId")]
        peer_id: String,
        #[serde(rename = "targetPeerId")]
        target_peer_id: String,
        candidate: String,
        #[serde(rename = "sdpMLineIndex")]
        sdp_m_line_index: Option<u16>,
        #[serde(rename = "sdpMid")]
        sdp_mid: Option<String>,
    },
}

impl SignalPayload {
    /// Sender identity embedded in the message
    pub fn peer_id(&self) -> &str {
        match self {
            SignalPayload::Offer { peer_id, .. }
            | SignalPayload::Answer { peer_id, .. }
            | SignalPayload::Candidate { peer_id, .. } => peer_id,
        }
    }

    /// Target identity embedded in the message
    pub fn target_peer_id(&self) -> &str {
        match self {
            SignalPayload::Offer { target_peer_id, .. }
            | SignalPayload::Answer { target_peer_id, .. }
            | SignalPayload::Candidate { target_peer_id, .. } => target_peer_id,
        }
    }

    /// True if this message is addressed to `id`
    pub fn is_for(&self, id: &str) -> bool {
        self.target_peer_id() == id
    }
}

/// Negotiation phase of a peer session
///
/// The phase is the single source of truth checked at the start of
/// every handler; stale or duplicate signals are dropped against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No negotiation in progress
    Idle,
    /// We sent an offer and wait for the answer
    OfferSent,
    /// An inbound offer is being applied
    OfferReceived,
    /// Our answer was applied locally and is on its way out
    AnswerSent,
    /// An inbound answer is being applied
    AnswerReceived,
    /// Both descriptions applied, candidates converging
    Negotiating,
    /// Data channel established
    Established,
    /// Session torn down by the consumer
    Closed,
}

/// Ready state of a data channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closed,
}

/// Session-level events delivered to the consumer
///
/// Exactly one delivery per event: `Ready` once per identity
/// assignment, `Open` once per channel instance, `Data` once per
/// received message. Failures surface as silence, not as events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The relay assigned our local identity; `connect` may be called
    Ready { id: String },
    /// The data channel is open and usable for `send`
    Open,
    /// A binary payload arrived from the remote peer
    Data(Bytes),
}

/// Configuration for a peer session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Label for the negotiated data channel
    pub channel_label: String,
    /// Sends are suppressed while `buffered_amount` is at or above this
    pub buffered_amount_limit: usize,
    /// STUN servers handed to the connectivity agent
    pub stun_servers: Vec<String>,
    /// Enable verbose logging
    pub debug: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            channel_label: "data".to_string(),
            // effectively zero: a send queued behind any unflushed bytes is dropped
            buffered_amount_limit: 1,
            stun_servers: vec![
                "stun:stun.iris.to:3478".to_string(),
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun.cloudflare.com:3478".to_string(),
            ],
            debug: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_addressing() {
        let msg = SignalPayload::Offer {
            peer_id: "a".to_string(),
            target_peer_id: "b".to_string(),
            sdp: "v=0".to_string(),
        };
        assert_eq!(msg.peer_id(), "a");
        assert_eq!(msg.target_peer_id(), "b");
        assert!(msg.is_for("b"));
        assert!(!msg.is_for("a"));
    }

    #[test]
    fn test_description_constructors() {
        assert_eq!(SessionDescription::offer("x").kind, SdpKind::Offer);
        assert_eq!(SessionDescription::answer("x").kind, SdpKind::Answer);
    }

    #[test]
    fn test_config_default() {
        let config = SessionConfig::default();
        assert_eq!(config.channel_label, "data");
        assert_eq!(config.buffered_amount_limit, 1);
        assert!(!config.stun_servers.is_empty());
        assert!(!config.debug);
    }
}
