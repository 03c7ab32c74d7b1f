//! Mock implementations for testing and simulation
//!
//! In-memory signaling hub, connectivity agent and data channels that
//! stand in for the real relay and WebRTC stack. Offer/answer pairing
//! goes through a shared [`MockAgentNetwork`] instance owned by the
//! test, so concurrent sessions never interfere through process-global
//! state.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::debug;

use crate::transport::{
    AgentEvent, ChannelEvent, ConnectivityAgent, DataChannel, LinkEvent, SignalingLink,
    TransportError,
};
use crate::types::{ChannelState, IceCandidate, SdpKind, SessionDescription, SignalPayload};

// ============================================================================
// Mock signaling hub
// ============================================================================

/// In-memory relay: assigns fixed identities and routes signals between
/// registered links
pub struct MockSignalingHub {
    inner: Mutex<HubInner>,
}

#[derive(Default)]
struct HubInner {
    peers: HashMap<String, mpsc::Sender<LinkEvent>>,
    /// Everything relayed through the hub, in order
    sent: Vec<SignalPayload>,
}

impl MockSignalingHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(HubInner::default()),
        })
    }

    /// Register a link under a fixed identity
    ///
    /// The identity is delivered as a `Ready` event when the link
    /// connects, matching the relay contract.
    pub async fn register(self: &Arc<Self>, id: impl Into<String>) -> MockSignalingLink {
        let id = id.into();
        let (tx, rx) = mpsc::channel(100);
        self.inner.lock().await.peers.insert(id.clone(), tx.clone());
        MockSignalingLink {
            id,
            hub: self.clone(),
            inbox_tx: Mutex::new(Some(tx)),
            inbox_rx: Mutex::new(rx),
            connected: AtomicBool::new(false),
        }
    }

    /// All payloads relayed so far
    pub async fn sent(&self) -> Vec<SignalPayload> {
        self.inner.lock().await.sent.clone()
    }

    async fn route(&self, source_id: &str, target_id: &str, payload: SignalPayload) {
        let tx = {
            let mut inner = self.inner.lock().await;
            inner.sent.push(payload.clone());
            inner.peers.get(target_id).cloned()
        };
        let Some(tx) = tx else {
            debug!("[MockHub] dropping signal for unknown peer {target_id}");
            return;
        };
        let _ = tx
            .send(LinkEvent::Signal {
                source_id: source_id.to_string(),
                payload,
            })
            .await;
    }
}

/// Signaling link backed by a [`MockSignalingHub`]
pub struct MockSignalingLink {
    id: String,
    hub: Arc<MockSignalingHub>,
    inbox_tx: Mutex<Option<mpsc::Sender<LinkEvent>>>,
    inbox_rx: Mutex<mpsc::Receiver<LinkEvent>>,
    connected: AtomicBool,
}

#[async_trait]
impl SignalingLink for MockSignalingLink {
    async fn connect(&self) -> Result<(), TransportError> {
        self.connected.store(true, Ordering::SeqCst);
        let tx = self.inbox_tx.lock().await.clone();
        if let Some(tx) = tx {
            let _ = tx.send(LinkEvent::Ready {
                id: self.id.clone(),
            })
            .await;
        }
        Ok(())
    }

    async fn send(&self, target_id: &str, payload: SignalPayload) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        self.hub.route(&self.id, target_id, payload).await;
        Ok(())
    }

    async fn recv(&self) -> Option<LinkEvent> {
        self.inbox_rx.lock().await.recv().await
    }

    async fn local_id(&self) -> Option<String> {
        if self.connected.load(Ordering::SeqCst) {
            Some(self.id.clone())
        } else {
            None
        }
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.inbox_tx.lock().await.take();
        self.hub.inner.lock().await.peers.remove(&self.id);
    }
}

// ============================================================================
// Mock data channel
// ============================================================================

/// In-memory data channel half; create both ends with [`MockDataChannel::pair`]
///
/// The pair shares an open trigger (returned from `pair`) and a closed
/// flag: flipping the trigger opens both halves, closing either half
/// closes both.
pub struct MockDataChannel {
    data_tx: mpsc::Sender<Bytes>,
    events: Mutex<mpsc::Receiver<ChannelEvent>>,
    opened: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    open_tx: Arc<watch::Sender<bool>>,
    closed_tx: Arc<watch::Sender<bool>>,
    /// Simulated unflushed byte count, settable from tests
    buffered: AtomicUsize,
}

impl MockDataChannel {
    /// Create a connected pair plus the shared open trigger
    pub fn pair() -> (Arc<Self>, Arc<Self>, Arc<watch::Sender<bool>>) {
        let open_tx = Arc::new(watch::channel(false).0);
        let closed_tx = Arc::new(watch::channel(false).0);
        let (tx_a, rx_a) = mpsc::channel(64);
        let (tx_b, rx_b) = mpsc::channel(64);

        let a = Self::build(tx_b, rx_a, &open_tx, &closed_tx);
        let b = Self::build(tx_a, rx_b, &open_tx, &closed_tx);
        (a, b, open_tx)
    }

    fn build(
        data_tx: mpsc::Sender<Bytes>,
        data_rx: mpsc::Receiver<Bytes>,
        open_tx: &Arc<watch::Sender<bool>>,
        closed_tx: &Arc<watch::Sender<bool>>,
    ) -> Arc<Self> {
        let (event_tx, event_rx) = mpsc::channel(64);
        let opened = Arc::new(AtomicBool::new(false));
        let closed = Arc::new(AtomicBool::new(false));
        let half = Arc::new(Self {
            data_tx,
            events: Mutex::new(event_rx),
            opened: opened.clone(),
            closed: closed.clone(),
            open_tx: open_tx.clone(),
            closed_tx: closed_tx.clone(),
            buffered: AtomicUsize::new(0),
        });
        Self::spawn_pump(
            open_tx.subscribe(),
            closed_tx.subscribe(),
            data_rx,
            event_tx,
            opened,
            closed,
        );
        half
    }

    /// Forward the open transition, inbound data and closure into the
    /// half's event stream
    fn spawn_pump(
        mut open_rx: watch::Receiver<bool>,
        mut closed_rx: watch::Receiver<bool>,
        mut data_rx: mpsc::Receiver<Bytes>,
        events: mpsc::Sender<ChannelEvent>,
        opened: Arc<AtomicBool>,
        closed: Arc<AtomicBool>,
    ) {
        tokio::spawn(async move {
            loop {
                if *closed_rx.borrow_and_update() {
                    closed.store(true, Ordering::SeqCst);
                    let _ = events.send(ChannelEvent::Closed).await;
                    return;
                }
                if *open_rx.borrow_and_update() {
                    break;
                }
                tokio::select! {
                    changed = open_rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                    changed = closed_rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                }
            }

            opened.store(true, Ordering::SeqCst);
            let _ = events.send(ChannelEvent::Open).await;

            loop {
                tokio::select! {
                    data = data_rx.recv() => match data {
                        Some(data) => {
                            let _ = events.send(ChannelEvent::Message(data)).await;
                        }
                        None => break,
                    },
                    changed = closed_rx.changed() => {
                        if changed.is_err() || *closed_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            closed.store(true, Ordering::SeqCst);
            let _ = events.send(ChannelEvent::Closed).await;
        });
    }

    /// Block until the shared open trigger fires
    pub async fn wait_until_open(&self) {
        let mut rx = self.open_tx.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Simulate unflushed bytes for backpressure tests
    pub fn set_buffered_amount(&self, amount: usize) {
        self.buffered.store(amount, Ordering::SeqCst);
    }

    /// Next payload received on this half, skipping lifecycle events
    pub async fn take_received(&self) -> Bytes {
        loop {
            match self.next_event().await {
                Some(ChannelEvent::Message(data)) => return data,
                Some(_) => continue,
                None => panic!("channel closed before data arrived"),
            }
        }
    }

    /// Non-blocking variant of [`MockDataChannel::take_received`]
    pub fn try_take_received(&self) -> Option<Bytes> {
        let mut events = self.events.try_lock().ok()?;
        loop {
            match events.try_recv() {
                Ok(ChannelEvent::Message(data)) => return Some(data),
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
    }
}

#[async_trait]
impl DataChannel for MockDataChannel {
    async fn send(&self, data: Bytes) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }
        self.data_tx
            .send(data)
            .await
            .map_err(|_| TransportError::Disconnected)
    }

    fn ready_state(&self) -> ChannelState {
        if self.closed.load(Ordering::SeqCst) {
            ChannelState::Closed
        } else if self.opened.load(Ordering::SeqCst) {
            ChannelState::Open
        } else {
            ChannelState::Connecting
        }
    }

    async fn buffered_amount(&self) -> usize {
        self.buffered.load(Ordering::SeqCst)
    }

    async fn next_event(&self) -> Option<ChannelEvent> {
        self.events.lock().await.recv().await
    }

    async fn close(&self) {
        let _ = self.closed_tx.send(true);
    }
}

// ============================================================================
// Mock connectivity agent
// ============================================================================

/// Shared pairing table linking an initiator's offer to the channel
/// half its responder will surface
pub struct MockAgentNetwork {
    pending: Mutex<HashMap<String, PendingChannel>>,
}

struct PendingChannel {
    remote_half: Arc<MockDataChannel>,
}

impl MockAgentNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(HashMap::new()),
        })
    }
}

/// Scripted connectivity agent
///
/// Descriptions are opaque tokens; pairing two agents over the same
/// [`MockAgentNetwork`] yields working in-memory channels once the
/// initiator applies the answer. Candidates are recorded, never
/// routed — an agent refuses them until a remote description is set,
/// and treats a re-added candidate as a no-op.
pub struct MockConnectivityAgent {
    name: String,
    network: Arc<MockAgentNetwork>,
    event_tx: Mutex<Option<mpsc::Sender<AgentEvent>>>,
    event_rx: Mutex<mpsc::Receiver<AgentEvent>>,
    closed_tx: watch::Sender<bool>,
    local_desc: Mutex<Option<SessionDescription>>,
    remote_desc: Mutex<Option<SessionDescription>>,
    applied_candidates: Mutex<Vec<IceCandidate>>,
    created: Mutex<Option<(Arc<MockDataChannel>, Arc<watch::Sender<bool>>)>>,
    open_trigger: Mutex<Option<Arc<watch::Sender<bool>>>>,
    desc_seq: AtomicU64,
    fail_offer: AtomicBool,
    fail_remote: AtomicBool,
}

impl MockConnectivityAgent {
    pub fn new(name: impl Into<String>, network: Arc<MockAgentNetwork>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(64);
        Self {
            name: name.into(),
            network,
            event_tx: Mutex::new(Some(event_tx)),
            event_rx: Mutex::new(event_rx),
            closed_tx: watch::channel(false).0,
            local_desc: Mutex::new(None),
            remote_desc: Mutex::new(None),
            applied_candidates: Mutex::new(Vec::new()),
            created: Mutex::new(None),
            open_trigger: Mutex::new(None),
            desc_seq: AtomicU64::new(0),
            fail_offer: AtomicBool::new(false),
            fail_remote: AtomicBool::new(false),
        }
    }

    /// Candidates applied so far, in application order
    pub async fn applied_candidates(&self) -> Vec<IceCandidate> {
        self.applied_candidates.lock().await.clone()
    }

    pub async fn local_description(&self) -> Option<SessionDescription> {
        self.local_desc.lock().await.clone()
    }

    pub async fn remote_description(&self) -> Option<SessionDescription> {
        self.remote_desc.lock().await.clone()
    }

    /// Simulate local candidate discovery
    pub async fn emit_candidate(&self, candidate: IceCandidate) {
        let tx = self.event_tx.lock().await.clone();
        if let Some(tx) = tx {
            let _ = tx.send(AgentEvent::CandidateDiscovered(candidate)).await;
        }
    }

    /// Make the next `create_offer` fail
    pub fn fail_next_offer(&self) {
        self.fail_offer.store(true, Ordering::SeqCst);
    }

    /// Make the next `set_remote_description` fail
    pub fn fail_next_remote_description(&self) {
        self.fail_remote.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConnectivityAgent for MockConnectivityAgent {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        if self.fail_offer.swap(false, Ordering::SeqCst) {
            return Err(TransportError::ConnectionFailed(
                "offer creation refused".to_string(),
            ));
        }
        let seq = self.desc_seq.fetch_add(1, Ordering::SeqCst);
        let sdp = format!("offer:{}:{seq}", self.name);

        // Publish the responder half under the offer token so the
        // remote agent can surface it when this offer is applied.
        if let Some((remote_half, open_tx)) = self.created.lock().await.take() {
            *self.open_trigger.lock().await = Some(open_tx);
            self.network
                .pending
                .lock()
                .await
                .insert(sdp.clone(), PendingChannel { remote_half });
        }
        Ok(SessionDescription::offer(sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        if self.remote_desc.lock().await.is_none() {
            return Err(TransportError::ConnectionFailed(
                "no remote description to answer".to_string(),
            ));
        }
        let seq = self.desc_seq.fetch_add(1, Ordering::SeqCst);
        Ok(SessionDescription::answer(format!(
            "answer:{}:{seq}",
            self.name
        )))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        *self.local_desc.lock().await = Some(desc);
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        if self.fail_remote.swap(false, Ordering::SeqCst) {
            return Err(TransportError::ConnectionFailed(
                "remote description rejected".to_string(),
            ));
        }
        match desc.kind {
            SdpKind::Offer => {
                // Responder path: adopt the initiator's channel and
                // surface it once the transport opens.
                let pending = self.network.pending.lock().await.remove(&desc.sdp);
                if let Some(pending) = pending {
                    let event_tx = self.event_tx.lock().await.clone();
                    if let Some(event_tx) = event_tx {
                        let half = pending.remote_half;
                        tokio::spawn(async move {
                            half.wait_until_open().await;
                            let _ = event_tx.send(AgentEvent::ChannelSurfaced(half)).await;
                        });
                    }
                }
            }
            SdpKind::Answer => {
                // Initiator path: the exchange is complete, open the pair.
                if let Some(open) = self.open_trigger.lock().await.take() {
                    let _ = open.send(true);
                }
            }
        }
        *self.remote_desc.lock().await = Some(desc);
        Ok(())
    }

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        if self.remote_desc.lock().await.is_none() {
            return Err(TransportError::ConnectionFailed(
                "no remote description for candidate".to_string(),
            ));
        }
        let mut applied = self.applied_candidates.lock().await;
        // a redundant candidate is a no-op, as with a real agent
        if !applied.iter().any(|c| c == &candidate) {
            applied.push(candidate);
        }
        Ok(())
    }

    async fn create_data_channel(&self) -> Result<Arc<dyn DataChannel>, TransportError> {
        let (local, remote, open_tx) = MockDataChannel::pair();
        *self.created.lock().await = Some((remote, open_tx));
        Ok(local)
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
        self.event_tx.lock().await.take();
        let _ = self.closed_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_mock_channel_roundtrip() {
        let (a, b, open) = MockDataChannel::pair();
        open.send(true).unwrap();

        a.send(Bytes::from_static(b"hello")).await.unwrap();
        assert_eq!(b.take_received().await, &b"hello"[..]);

        b.send(Bytes::from_static(b"world")).await.unwrap();
        assert_eq!(a.take_received().await, &b"world"[..]);
    }

    #[tokio::test]
    async fn test_mock_channel_open_then_close_events() {
        let (a, _b, open) = MockDataChannel::pair();
        assert_eq!(a.ready_state(), ChannelState::Connecting);

        open.send(true).unwrap();
        assert!(matches!(a.next_event().await, Some(ChannelEvent::Open)));
        assert_eq!(a.ready_state(), ChannelState::Open);

        a.close().await;
        assert!(matches!(a.next_event().await, Some(ChannelEvent::Closed)));
        assert_eq!(a.ready_state(), ChannelState::Closed);
    }

    #[tokio::test]
    async fn test_candidate_refused_without_remote_description() {
        let network = MockAgentNetwork::new();
        let agent = MockConnectivityAgent::new("x", network);
        let candidate = IceCandidate {
            candidate: "candidate:0 1 UDP 1 192.0.2.1 3478 typ host".to_string(),
            sdp_m_line_index: Some(0),
            sdp_mid: None,
        };
        assert!(agent.add_candidate(candidate).await.is_err());
    }

    #[tokio::test]
    async fn test_hub_routes_between_registered_links() {
        let hub = MockSignalingHub::new();
        let a = hub.register("a").await;
        let b = hub.register("b").await;
        a.connect().await.unwrap();
        b.connect().await.unwrap();

        assert!(matches!(b.recv().await, Some(LinkEvent::Ready { .. })));

        a.send(
            "b",
            SignalPayload::Offer {
                peer_id: "a".to_string(),
                target_peer_id: "b".to_string(),
                sdp: "x".to_string(),
            },
        )
        .await
        .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(1), b.recv())
            .await
            .unwrap();
        match event {
            Some(LinkEvent::Signal { source_id, payload }) => {
                assert_eq!(source_id, "a");
                assert!(matches!(payload, SignalPayload::Offer { .. }));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
