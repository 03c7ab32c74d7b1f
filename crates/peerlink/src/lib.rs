//! Peer-to-peer session negotiation and data channels
//!
//! This crate establishes a direct data connection between two
//! endpoints that cannot reach each other directly, using a signaling
//! relay to exchange offer/answer/candidate messages and a
//! connectivity agent (WebRTC in production) to converge on a usable
//! transport path. Once established, the session exposes an unordered,
//! best-effort binary message channel.
//!
//! # Overview
//!
//! - **Negotiation**: [`PeerSession`] turns the partially-ordered
//!   signal stream into a consistent per-peer state machine
//! - **Channel lifecycle**: [`DataChannelManager`] owns the single data
//!   channel, gates sends on backpressure, and delivers inbound payloads
//! - **Facade**: [`PeerClient`] composes both behind `connect`/`send`
//!   and a typed event stream (`Ready`, `Open`, `Data`)
//!
//! The relay link and the connectivity agent are trait seams
//! ([`SignalingLink`], [`ConnectivityAgent`]) with production adapters
//! ([`WsSignalingLink`], [`WebRtcAgent`]) and in-memory mocks for
//! tests and simulation.
//!
//! # Example
//!
//! ```rust,no_run
//! use peerlink::{PeerClient, SessionConfig, SessionEvent, WebRtcAgent, WsSignalingLink};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SessionConfig::default();
//!     let link = WsSignalingLink::new("wss://relay.example.net", config.debug);
//!     let agent = WebRtcAgent::new(&config).await?;
//!
//!     let client = PeerClient::new(link, agent, config);
//!     let mut events = client.events().await.expect("events already taken");
//!     client.start().await?;
//!
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             SessionEvent::Ready { id } => {
//!                 println!("our identity: {id}");
//!                 client.connect("remote-peer-id").await?;
//!             }
//!             SessionEvent::Open => client.send(b"hello").await,
//!             SessionEvent::Data(payload) => println!("got {} bytes", payload.len()),
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod client;
pub mod mock;
pub mod rtc;
pub mod session;
pub mod transport;
pub mod types;
pub mod ws;

pub use channel::DataChannelManager;
pub use client::PeerClient;
pub use rtc::WebRtcAgent;
pub use session::{PeerSession, SessionError};
pub use transport::{
    AgentEvent, ChannelEvent, ConnectivityAgent, DataChannel, LinkEvent, SignalingLink,
    TransportError,
};
pub use types::{
    ChannelState, IceCandidate, SdpKind, SessionConfig, SessionDescription, SessionEvent,
    SessionPhase, SignalPayload,
};
pub use ws::WsSignalingLink;
