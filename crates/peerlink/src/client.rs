//! Public session facade
//!
//! [`PeerClient`] wires the signaling link, the negotiation state
//! machine and the data channel manager together and exposes the
//! minimal consumer surface: `connect`, `send`, and a single typed
//! event stream (`Ready`, `Open`, `Data`).

use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use crate::channel::DataChannelManager;
use crate::session::{PeerSession, SessionError};
use crate::transport::{ChannelEvent, ConnectivityAgent, LinkEvent, SignalingLink, TransportError};
use crate::types::{SessionConfig, SessionEvent, SessionPhase};

/// Composed peer-to-peer session client
///
/// Background tasks drain the link, the agent and the channel into the
/// session; all consumer-visible output flows through the event stream
/// returned by [`PeerClient::events`].
pub struct PeerClient<L, A> {
    link: Arc<L>,
    agent: Arc<A>,
    session: Arc<PeerSession<A>>,
    channels: Arc<DataChannelManager>,
    /// Outbound signals produced by the session, drained into the link
    signal_rx: RwLock<Option<mpsc::Receiver<crate::types::SignalPayload>>>,
    /// Channel lifecycle events produced by the manager
    channel_rx: RwLock<Option<mpsc::Receiver<ChannelEvent>>>,
    event_tx: mpsc::Sender<SessionEvent>,
    event_rx: RwLock<Option<mpsc::Receiver<SessionEvent>>>,
    running: Arc<RwLock<bool>>,
}

impl<L, A> PeerClient<L, A>
where
    L: SignalingLink + 'static,
    A: ConnectivityAgent + 'static,
{
    pub fn new(link: L, agent: A, config: SessionConfig) -> Self {
        let (signal_tx, signal_rx) = mpsc::channel(100);
        let (channel_tx, channel_rx) = mpsc::channel(100);
        let (event_tx, event_rx) = mpsc::channel(100);

        let agent = Arc::new(agent);
        let channels = Arc::new(DataChannelManager::new(
            channel_tx,
            config.buffered_amount_limit,
            config.debug,
        ));
        let session = Arc::new(PeerSession::new(
            agent.clone(),
            channels.clone(),
            signal_tx,
            config,
        ));

        Self {
            link: Arc::new(link),
            agent,
            session,
            channels,
            signal_rx: RwLock::new(Some(signal_rx)),
            channel_rx: RwLock::new(Some(channel_rx)),
            event_tx,
            event_rx: RwLock::new(Some(event_rx)),
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Connect the signaling link and start the background loops
    ///
    /// The relay-assigned identity arrives as [`SessionEvent::Ready`] on
    /// the event stream once the relay confirms it.
    pub async fn start(&self) -> Result<(), TransportError> {
        self.link.connect().await?;
        *self.running.write().await = true;

        self.start_link_loop().await;
        self.start_agent_loop().await;
        self.start_signal_sender().await;
        self.start_channel_loop().await;
        Ok(())
    }

    /// Begin a negotiation towards `target_id`
    ///
    /// The only caller-visible failure is [`SessionError::NotReady`]
    /// (no identity assigned yet). Negotiation failures are logged and
    /// surface to the consumer as silence: no `Open` event ever fires.
    pub async fn connect(&self, target_id: &str) -> Result<(), SessionError> {
        match self.session.initiate(target_id).await {
            Ok(()) => Ok(()),
            Err(SessionError::NotReady) => Err(SessionError::NotReady),
            Err(err) => {
                debug!("[Client] connect to {target_id} failed: {err}");
                Ok(())
            }
        }
    }

    /// Send a binary payload to the connected peer
    ///
    /// A no-op when the channel is absent, not open, or backpressured.
    pub async fn send(&self, payload: &[u8]) {
        self.channels.send(payload).await;
    }

    /// Take the consumer event stream; yields each event exactly once.
    /// Returns `None` if already taken.
    pub async fn events(&self) -> Option<mpsc::Receiver<SessionEvent>> {
        self.event_rx.write().await.take()
    }

    pub async fn phase(&self) -> SessionPhase {
        self.session.phase().await
    }

    pub async fn local_id(&self) -> Option<String> {
        self.session.local_id().await
    }

    /// Stop the background loops, close the link, the agent and the channel
    pub async fn stop(&self) {
        *self.running.write().await = false;
        self.session.close().await;
        self.channels.discard().await;
        self.agent.close().await;
        self.link.close().await;
    }

    /// Drain link events: identity assignment and forwarded signals
    async fn start_link_loop(&self) {
        let link = self.link.clone();
        let session = self.session.clone();
        let event_tx = self.event_tx.clone();
        let running = self.running.clone();

        tokio::spawn(async move {
            while let Some(event) = link.recv().await {
                if !*running.read().await {
                    break;
                }
                match event {
                    LinkEvent::Ready { id } => {
                        session.assign_local_id(id.clone()).await;
                        let _ = event_tx.send(SessionEvent::Ready { id }).await;
                    }
                    LinkEvent::Signal { source_id, payload } => {
                        session.handle_signal(&source_id, payload).await;
                    }
                }
            }
        });
    }

    /// Drain agent events: discovered candidates and surfaced channels
    async fn start_agent_loop(&self) {
        let agent = self.agent.clone();
        let session = self.session.clone();
        let running = self.running.clone();

        tokio::spawn(async move {
            while let Some(event) = agent.next_event().await {
                if !*running.read().await {
                    break;
                }
                session.handle_agent_event(event).await;
            }
        });
    }

    /// Drain outbound signals from the session into the link
    async fn start_signal_sender(&self) {
        let link = self.link.clone();
        let running = self.running.clone();
        let mut rx = match self.signal_rx.write().await.take() {
            Some(rx) => rx,
            None => return,
        };

        tokio::spawn(async move {
            while let Some(payload) = rx.recv().await {
                if !*running.read().await {
                    break;
                }
                let target = payload.target_peer_id().to_string();
                if let Err(err) = link.send(&target, payload).await {
                    warn!("[Client] failed to send signal to {target}: {err}");
                }
            }
        });
    }

    /// Drain channel lifecycle events into the session and the consumer
    async fn start_channel_loop(&self) {
        let session = self.session.clone();
        let event_tx = self.event_tx.clone();
        let running = self.running.clone();
        let mut rx = match self.channel_rx.write().await.take() {
            Some(rx) => rx,
            None => return,
        };

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if !*running.read().await {
                    break;
                }
                match event {
                    ChannelEvent::Open => {
                        session.on_channel_open().await;
                        let _ = event_tx.send(SessionEvent::Open).await;
                    }
                    ChannelEvent::Message(data) => {
                        let _ = event_tx.send(SessionEvent::Data(data)).await;
                    }
                    ChannelEvent::Closed => {
                        session.on_channel_closed().await;
                    }
                }
            }
        });
    }
}
