//! Data channel lifecycle and backpressure
//!
//! The manager owns exactly one data channel at a time: it creates the
//! channel as initiator or adopts one surfaced by the agent as
//! responder, watches its lifecycle, and mediates all sends through a
//! backpressure gate. Payloads that cannot be sent are dropped
//! silently, consistent with the channel's unreliable contract.

use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use crate::transport::{ChannelEvent, ConnectivityAgent, DataChannel, TransportError};
use crate::types::ChannelState;

/// Owns the single data channel of a peer session
pub struct DataChannelManager {
    /// The channel, once created or adopted
    channel: RwLock<Option<Arc<dyn DataChannel>>>,
    /// Bumped on every install/discard so stale watchers stop forwarding
    generation: AtomicU64,
    /// Lifecycle events forwarded to the session facade
    event_tx: mpsc::Sender<ChannelEvent>,
    /// Sends are suppressed at or above this buffered byte count
    buffered_limit: usize,
    debug: bool,
}

impl DataChannelManager {
    pub fn new(event_tx: mpsc::Sender<ChannelEvent>, buffered_limit: usize, debug: bool) -> Self {
        Self {
            channel: RwLock::new(None),
            generation: AtomicU64::new(0),
            event_tx,
            buffered_limit,
            debug,
        }
    }

    /// Create the channel as initiator and take ownership
    pub async fn create_as_initiator<A: ConnectivityAgent>(
        self: &Arc<Self>,
        agent: &A,
    ) -> Result<(), TransportError> {
        let channel = agent.create_data_channel().await?;
        self.install(channel).await;
        Ok(())
    }

    /// Take ownership of a channel surfaced by the agent (responder path)
    pub async fn accept_incoming(self: &Arc<Self>, channel: Arc<dyn DataChannel>) {
        self.install(channel).await;
    }

    /// True while a channel is owned (any ready state)
    pub async fn has_channel(&self) -> bool {
        self.channel.read().await.is_some()
    }

    /// Ready state of the owned channel, if any
    pub async fn ready_state(&self) -> Option<ChannelState> {
        self.channel.read().await.as_ref().map(|c| c.ready_state())
    }

    /// Send a payload through the channel
    ///
    /// Gated on: a channel exists, its ready state is Open, and its
    /// buffered amount is below the configured limit. A failed gate is
    /// a silent no-op; the payload is dropped.
    pub async fn send(&self, payload: &[u8]) {
        let channel = self.channel.read().await.clone();
        let Some(channel) = channel else {
            if self.debug {
                debug!("[Channel] send suppressed: no channel");
            }
            return;
        };
        if channel.ready_state() != ChannelState::Open {
            if self.debug {
                debug!("[Channel] send suppressed: channel not open");
            }
            return;
        }
        if channel.buffered_amount().await >= self.buffered_limit {
            if self.debug {
                debug!("[Channel] send suppressed: backpressure");
            }
            return;
        }
        // A send that races channel closure may still fail; that loss
        // is equivalent to a drop on the wire.
        if let Err(err) = channel.send(Bytes::copy_from_slice(payload)).await {
            debug!("[Channel] send failed, payload dropped: {err}");
        }
    }

    /// Discard the owned channel, closing it
    pub async fn discard(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let channel = self.channel.write().await.take();
        if let Some(channel) = channel {
            channel.close().await;
        }
    }

    /// Install a channel and watch its lifecycle
    ///
    /// `Open` is forwarded exactly once per channel instance. After
    /// `Closed` the channel is dropped and no further events are
    /// forwarded.
    async fn install(self: &Arc<Self>, channel: Arc<dyn DataChannel>) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut slot = self.channel.write().await;
            if let Some(old) = slot.take() {
                warn!("[Channel] replacing existing channel");
                old.close().await;
            }
            *slot = Some(channel.clone());
        }

        let manager = self.clone();
        tokio::spawn(async move {
            let mut opened = false;
            while let Some(event) = channel.next_event().await {
                if manager.generation.load(Ordering::SeqCst) != generation {
                    break;
                }
                match event {
                    ChannelEvent::Open => {
                        if !opened {
                            opened = true;
                            let _ = manager.event_tx.send(ChannelEvent::Open).await;
                        }
                    }
                    ChannelEvent::Message(data) => {
                        let _ = manager.event_tx.send(ChannelEvent::Message(data)).await;
                    }
                    ChannelEvent::Closed => {
                        // Only clear the slot if we are still the
                        // current watcher; a newer install owns it now.
                        if manager.generation.load(Ordering::SeqCst) == generation {
                            *manager.channel.write().await = None;
                            let _ = manager.event_tx.send(ChannelEvent::Closed).await;
                        }
                        break;
                    }
                }
            }
        });
    }
}
