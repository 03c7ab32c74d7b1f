//! Transport abstractions
//!
//! Defines traits for the signaling relay link and the
//! connectivity-establishment agent so the session core can run against
//! both real (WebSocket + WebRTC) and mock implementations.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;

use crate::types::{ChannelState, IceCandidate, SessionDescription, SignalPayload};

/// Errors from link and agent boundary operations
#[derive(Debug, Error, Clone)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("disconnected")]
    Disconnected,
    #[error("not connected")]
    NotConnected,
}

/// Events delivered by the signaling link
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// The relay assigned our session identity
    Ready { id: String },
    /// A signal forwarded from another peer
    Signal {
        source_id: String,
        payload: SignalPayload,
    },
}

/// Events surfaced by the connectivity agent
pub enum AgentEvent {
    /// A local network path was discovered and should be forwarded to
    /// the remote peer
    CandidateDiscovered(IceCandidate),
    /// The remote peer opened a data channel towards us (responder path)
    ChannelSurfaced(Arc<dyn DataChannel>),
}

/// Lifecycle events of a single data channel
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// Ready state reached Open
    Open,
    /// A binary message arrived
    Message(Bytes),
    /// Ready state reached Closed; no further events follow
    Closed,
}

/// Connection to the signaling relay
///
/// The relay assigns a session identity on connect and forwards opaque
/// signal payloads between named endpoints. It promises delivery in
/// arrival order, not in the order the sender generated messages.
#[async_trait]
pub trait SignalingLink: Send + Sync {
    /// Connect to the relay; the assigned identity arrives as a
    /// [`LinkEvent::Ready`] on the event stream
    async fn connect(&self) -> Result<(), TransportError>;

    /// Send a signal to the named target
    async fn send(&self, target_id: &str, payload: SignalPayload) -> Result<(), TransportError>;

    /// Receive the next link event; `None` once the link is closed
    async fn recv(&self) -> Option<LinkEvent>;

    /// Our relay-assigned identity, if one has been assigned yet
    async fn local_id(&self) -> Option<String>;

    /// Close the link; pending `recv` calls complete with `None`
    async fn close(&self);
}

/// The connectivity-establishment agent
///
/// Drives NAT traversal and transport setup through a narrow
/// description/candidate interface. Negotiation internals (gathering,
/// pairing, encryption) are the agent's concern, not the session's.
#[async_trait]
pub trait ConnectivityAgent: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError>;

    async fn create_answer(&self) -> Result<SessionDescription, TransportError>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), TransportError>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), TransportError>;

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError>;

    /// Create the data channel as initiator, configured unordered and
    /// unreliable with binary framing
    async fn create_data_channel(&self) -> Result<Arc<dyn DataChannel>, TransportError>;

    /// Receive the next agent event; `None` once the agent is closed
    async fn next_event(&self) -> Option<AgentEvent>;

    async fn close(&self);
}

/// A bidirectional, unordered, best-effort data channel
#[async_trait]
pub trait DataChannel: Send + Sync {
    /// Send a binary payload; delivery is best-effort
    async fn send(&self, data: Bytes) -> Result<(), TransportError>;

    fn ready_state(&self) -> ChannelState;

    /// Bytes queued for send but not yet flushed to the transport
    async fn buffered_amount(&self) -> usize;

    /// Receive the next lifecycle event; `None` after `Closed`
    async fn next_event(&self) -> Option<ChannelEvent>;

    async fn close(&self);
}

// Blanket implementations for Arc<T> so Arc-wrapped transports satisfy
// the generic bounds directly

#[async_trait]
impl<T: SignalingLink + ?Sized> SignalingLink for Arc<T> {
    async fn connect(&self) -> Result<(), TransportError> {
        (**self).connect().await
    }

    async fn send(&self, target_id: &str, payload: SignalPayload) -> Result<(), TransportError> {
        (**self).send(target_id, payload).await
    }

    async fn recv(&self) -> Option<LinkEvent> {
        (**self).recv().await
    }

    async fn local_id(&self) -> Option<String> {
        (**self).local_id().await
    }

    async fn close(&self) {
        (**self).close().await
    }
}

#[async_trait]
impl<T: ConnectivityAgent + ?Sized> ConnectivityAgent for Arc<T> {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        (**self).create_offer().await
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        (**self).create_answer().await
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        (**self).set_local_description(desc).await
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        (**self).set_remote_description(desc).await
    }

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        (**self).add_candidate(candidate).await
    }

    async fn create_data_channel(&self) -> Result<Arc<dyn DataChannel>, TransportError> {
        (**self).create_data_channel().await
    }

    async fn next_event(&self) -> Option<AgentEvent> {
        (**self).next_event().await
    }

    async fn close(&self) {
        (**self).close().await
    }
}

#[async_trait]
impl<T: DataChannel + ?Sized> DataChannel for Arc<T> {
    async fn send(&self, data: Bytes) -> Result<(), TransportError> {
        (**self).send(data).await
    }

    fn ready_state(&self) -> ChannelState {
        (**self).ready_state()
    }

    async fn buffered_amount(&self) -> usize {
        (**self).buffered_amount().await
    }

    async fn next_event(&self) -> Option<ChannelEvent> {
        (**self).next_event().await
    }

    async fn close(&self) {
        (**self).close().await
    }
}
