//! Negotiation state machine and end-to-end session tests
//!
//! All tests run against the in-memory mock relay and mock connectivity
//! agent; two clients sharing a hub and an agent network form a working
//! pair without touching the real network.

use peerlink::channel::DataChannelManager;
use peerlink::mock::{MockAgentNetwork, MockConnectivityAgent, MockSignalingHub, MockSignalingLink};
use peerlink::session::{PeerSession, SessionError};
use peerlink::transport::{AgentEvent, ChannelEvent};
use peerlink::types::{IceCandidate, SessionConfig, SessionEvent, SessionPhase, SignalPayload};
use peerlink::PeerClient;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

fn candidate(n: u8) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{n} 1 UDP 2122252543 192.0.2.{n} 44442 typ host"),
        sdp_m_line_index: Some(0),
        sdp_mid: Some("0".to_string()),
    }
}

fn offer_from(peer: &str, target: &str, sdp: &str) -> SignalPayload {
    SignalPayload::Offer {
        peer_id: peer.to_string(),
        target_peer_id: target.to_string(),
        sdp: sdp.to_string(),
    }
}

fn answer_from(peer: &str, target: &str, sdp: &str) -> SignalPayload {
    SignalPayload::Answer {
        peer_id: peer.to_string(),
        target_peer_id: target.to_string(),
        sdp: sdp.to_string(),
    }
}

fn candidate_from(peer: &str, target: &str, c: &IceCandidate) -> SignalPayload {
    SignalPayload::Candidate {
        peer_id: peer.to_string(),
        target_peer_id: target.to_string(),
        candidate: c.candidate.clone(),
        sdp_m_line_index: c.sdp_m_line_index,
        sdp_mid: c.sdp_mid.clone(),
    }
}

/// Session wired to a mock agent, with taps on the outbound signal
/// queue and the channel event queue
fn session_harness(
    network: &Arc<MockAgentNetwork>,
) -> (
    Arc<MockConnectivityAgent>,
    PeerSession<MockConnectivityAgent>,
    mpsc::Receiver<SignalPayload>,
    mpsc::Receiver<ChannelEvent>,
) {
    let agent = Arc::new(MockConnectivityAgent::new("agent", network.clone()));
    let (signal_tx, signal_rx) = mpsc::channel(16);
    let (channel_tx, channel_rx) = mpsc::channel(16);
    let channels = Arc::new(DataChannelManager::new(channel_tx, 1, false));
    let session = PeerSession::new(agent.clone(), channels, signal_tx, SessionConfig::default());
    (agent, session, signal_rx, channel_rx)
}

// ============================================================================
// State machine properties
// ============================================================================

#[tokio::test]
async fn test_candidates_before_offer_buffered_then_applied_in_order() {
    let network = MockAgentNetwork::new();
    let (agent, session, mut signal_rx, _channel_rx) = session_harness(&network);
    session.assign_local_id("a".to_string()).await;

    let c1 = candidate(1);
    let c2 = candidate(2);
    session.handle_signal("b", candidate_from("b", "a", &c1)).await;
    session.handle_signal("b", candidate_from("b", "a", &c2)).await;

    assert_eq!(session.pending_candidate_count().await, 2);
    assert!(agent.applied_candidates().await.is_empty());

    session.handle_signal("b", offer_from("b", "a", "offer:remote:0")).await;

    // buffered candidates applied exactly once, in arrival order
    assert_eq!(agent.applied_candidates().await, vec![c1, c2]);
    assert_eq!(session.pending_candidate_count().await, 0);
    assert_eq!(session.phase().await, SessionPhase::Negotiating);

    // and the answer went out to the offerer
    let out = signal_rx.recv().await.expect("answer expected");
    match out {
        SignalPayload::Answer { target_peer_id, .. } => assert_eq!(target_peer_id, "b"),
        other => panic!("expected answer, got {other:?}"),
    }
}

#[tokio::test]
async fn test_candidate_before_answer_buffered_on_initiator_side() {
    let network = MockAgentNetwork::new();
    let (agent, session, mut signal_rx, _channel_rx) = session_harness(&network);
    session.assign_local_id("a".to_string()).await;

    session.initiate("b").await.unwrap();
    assert_eq!(session.phase().await, SessionPhase::OfferSent);
    assert!(matches!(
        signal_rx.recv().await,
        Some(SignalPayload::Offer { .. })
    ));

    // candidate outruns the answer: no remote description yet
    let c = candidate(1);
    session.handle_signal("b", candidate_from("b", "a", &c)).await;
    assert_eq!(session.pending_candidate_count().await, 1);
    assert!(agent.applied_candidates().await.is_empty());

    session.handle_signal("b", answer_from("b", "a", "answer:remote:0")).await;
    assert_eq!(session.phase().await, SessionPhase::Negotiating);
    assert_eq!(agent.applied_candidates().await, vec![c]);
}

#[tokio::test]
async fn test_duplicate_candidate_is_harmless() {
    let network = MockAgentNetwork::new();
    let (agent, session, _signal_rx, _channel_rx) = session_harness(&network);
    session.assign_local_id("a".to_string()).await;

    session.handle_signal("b", offer_from("b", "a", "offer:remote:0")).await;
    assert_eq!(session.phase().await, SessionPhase::Negotiating);

    let c = candidate(1);
    session.handle_signal("b", candidate_from("b", "a", &c)).await;
    session.handle_signal("b", candidate_from("b", "a", &c)).await;

    // second application observably a no-op, not an error
    assert_eq!(agent.applied_candidates().await, vec![c]);
    assert_eq!(session.phase().await, SessionPhase::Negotiating);
}

#[tokio::test]
async fn test_buffered_candidate_from_another_source_not_applied() {
    let network = MockAgentNetwork::new();
    let (agent, session, _signal_rx, _channel_rx) = session_harness(&network);
    session.assign_local_id("a".to_string()).await;

    // stray candidate from "c" while idle
    session.handle_signal("c", candidate_from("c", "a", &candidate(9))).await;
    assert_eq!(session.pending_candidate_count().await, 1);

    // negotiation then happens with "b"
    session.handle_signal("b", offer_from("b", "a", "offer:remote:0")).await;
    assert!(agent.applied_candidates().await.is_empty());
    assert_eq!(session.pending_candidate_count().await, 0);
}

#[tokio::test]
async fn test_answer_without_outstanding_offer_dropped() {
    let network = MockAgentNetwork::new();
    let (agent, session, _signal_rx, _channel_rx) = session_harness(&network);
    session.assign_local_id("a".to_string()).await;

    session.handle_signal("b", answer_from("b", "a", "answer:remote:0")).await;

    assert_eq!(session.phase().await, SessionPhase::Idle);
    assert!(agent.remote_description().await.is_none());
}

#[tokio::test]
async fn test_late_duplicate_answer_dropped() {
    let network = MockAgentNetwork::new();
    let (_agent, session, mut signal_rx, _channel_rx) = session_harness(&network);
    session.assign_local_id("a".to_string()).await;

    session.initiate("b").await.unwrap();
    let _ = signal_rx.recv().await;
    session.handle_signal("b", answer_from("b", "a", "answer:remote:0")).await;
    assert_eq!(session.phase().await, SessionPhase::Negotiating);

    // relay re-delivered the answer; it must not re-apply
    session.handle_signal("b", answer_from("b", "a", "answer:remote:0")).await;
    assert_eq!(session.phase().await, SessionPhase::Negotiating);
}

#[tokio::test]
async fn test_offer_after_remote_description_dropped_as_stale() {
    let network = MockAgentNetwork::new();
    let (agent, session, _signal_rx, _channel_rx) = session_harness(&network);
    session.assign_local_id("a".to_string()).await;

    session.handle_signal("b", offer_from("b", "a", "offer:remote:0")).await;
    assert_eq!(session.phase().await, SessionPhase::Negotiating);

    session.handle_signal("b", offer_from("b", "a", "offer:remote:1")).await;

    // the first description stands; the session never applies a second
    // remote description without an intervening reset
    assert_eq!(
        agent.remote_description().await.map(|d| d.sdp),
        Some("offer:remote:0".to_string())
    );
    assert_eq!(session.phase().await, SessionPhase::Negotiating);
}

#[tokio::test]
async fn test_initiate_without_identity_reports_not_ready() {
    let network = MockAgentNetwork::new();
    let (_agent, session, mut signal_rx, _channel_rx) = session_harness(&network);

    let err = session.initiate("b").await.unwrap_err();
    assert!(matches!(err, SessionError::NotReady));
    assert_eq!(session.phase().await, SessionPhase::Idle);
    assert!(signal_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_initiate_failure_rolls_back_to_idle() {
    let network = MockAgentNetwork::new();
    let (agent, session, mut signal_rx, _channel_rx) = session_harness(&network);
    session.assign_local_id("a".to_string()).await;

    agent.fail_next_offer();
    let err = session.initiate("b").await;
    assert!(err.is_err());

    // rollback, not partial state: no target, no phase change, no signal
    assert_eq!(session.phase().await, SessionPhase::Idle);
    assert_eq!(session.target_id().await, None);
    assert!(signal_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_bad_offer_resets_session_to_idle() {
    let network = MockAgentNetwork::new();
    let (agent, session, mut signal_rx, _channel_rx) = session_harness(&network);
    session.assign_local_id("a".to_string()).await;

    agent.fail_next_remote_description();
    session.handle_signal("b", offer_from("b", "a", "offer:remote:0")).await;

    assert_eq!(session.phase().await, SessionPhase::Idle);
    assert_eq!(session.target_id().await, None);
    assert!(signal_rx.try_recv().is_err());

    // the session recovers: a later good offer negotiates normally
    session.handle_signal("b", offer_from("b", "a", "offer:remote:1")).await;
    assert_eq!(session.phase().await, SessionPhase::Negotiating);
    assert!(matches!(
        signal_rx.recv().await,
        Some(SignalPayload::Answer { .. })
    ));
}

#[tokio::test]
async fn test_signal_from_competing_source_rejected() {
    let network = MockAgentNetwork::new();
    let (_agent, session, mut signal_rx, _channel_rx) = session_harness(&network);
    session.assign_local_id("a".to_string()).await;

    session.initiate("b").await.unwrap();
    let _ = signal_rx.recv().await;

    session.handle_signal("c", offer_from("c", "a", "offer:other:0")).await;

    // "c" does not displace the active negotiation with "b"
    assert_eq!(session.target_id().await.as_deref(), Some("b"));
    assert_eq!(session.phase().await, SessionPhase::OfferSent);
    assert!(signal_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_local_candidate_forwarded_only_with_target() {
    let network = MockAgentNetwork::new();
    let (_agent, session, mut signal_rx, _channel_rx) = session_harness(&network);
    session.assign_local_id("a".to_string()).await;

    // discovered before anyone to send it to: dropped
    session
        .handle_agent_event(AgentEvent::CandidateDiscovered(candidate(1)))
        .await;
    assert!(signal_rx.try_recv().is_err());

    session.initiate("b").await.unwrap();
    let _ = signal_rx.recv().await; // the offer

    session
        .handle_agent_event(AgentEvent::CandidateDiscovered(candidate(2)))
        .await;
    match signal_rx.recv().await {
        Some(SignalPayload::Candidate { target_peer_id, .. }) => {
            assert_eq!(target_peer_id, "b");
        }
        other => panic!("expected candidate, got {other:?}"),
    }
}

// ============================================================================
// End-to-end scenarios over the facade
// ============================================================================

async fn start_client(
    hub: &Arc<MockSignalingHub>,
    network: &Arc<MockAgentNetwork>,
    id: &str,
) -> (
    PeerClient<MockSignalingLink, MockConnectivityAgent>,
    mpsc::Receiver<SessionEvent>,
) {
    let link = hub.register(id).await;
    let agent = MockConnectivityAgent::new(id, network.clone());
    let client = PeerClient::new(link, agent, SessionConfig::default());
    let mut events = client.events().await.expect("events taken twice");
    client.start().await.expect("start failed");

    match timeout(Duration::from_secs(2), events.recv()).await.unwrap() {
        Some(SessionEvent::Ready { id: assigned }) => assert_eq!(assigned, id),
        other => panic!("expected ready, got {other:?}"),
    }
    (client, events)
}

async fn wait_for_open(events: &mut mpsc::Receiver<SessionEvent>) {
    match timeout(Duration::from_secs(2), events.recv()).await.unwrap() {
        Some(SessionEvent::Open) => {}
        other => panic!("expected open, got {other:?}"),
    }
}

async fn wait_for_data(events: &mut mpsc::Receiver<SessionEvent>) -> bytes::Bytes {
    match timeout(Duration::from_secs(2), events.recv()).await.unwrap() {
        Some(SessionEvent::Data(payload)) => payload,
        other => panic!("expected data, got {other:?}"),
    }
}

#[tokio::test]
async fn test_end_to_end_connect_and_exchange() {
    let hub = MockSignalingHub::new();
    let network = MockAgentNetwork::new();

    let (c1, mut events1) = start_client(&hub, &network, "a").await;
    let (c2, mut events2) = start_client(&hub, &network, "b").await;

    c1.connect("b").await.unwrap();

    wait_for_open(&mut events1).await;
    wait_for_open(&mut events2).await;
    assert_eq!(c1.phase().await, SessionPhase::Established);
    assert_eq!(c2.phase().await, SessionPhase::Established);

    c1.send(b"ping").await;
    assert_eq!(wait_for_data(&mut events2).await, &b"ping"[..]);

    c2.send(b"pong").await;
    assert_eq!(wait_for_data(&mut events1).await, &b"pong"[..]);

    c1.stop().await;
    c2.stop().await;
}

#[tokio::test]
async fn test_connect_before_ready_reports_not_ready_and_sends_nothing() {
    let hub = MockSignalingHub::new();
    let network = MockAgentNetwork::new();

    let link = hub.register("a").await;
    let agent = MockConnectivityAgent::new("a", network.clone());
    let client = PeerClient::new(link, agent, SessionConfig::default());

    // never started: the relay has not assigned an identity
    let err = client.connect("b").await.unwrap_err();
    assert!(matches!(err, SessionError::NotReady));
    assert_eq!(client.phase().await, SessionPhase::Idle);
    assert!(hub.sent().await.is_empty());
}

#[tokio::test]
async fn test_send_without_session_is_silent() {
    let hub = MockSignalingHub::new();
    let network = MockAgentNetwork::new();

    let (client, _events) = start_client(&hub, &network, "a").await;

    // no negotiation, no channel: a send simply disappears
    client.send(b"into the void").await;
    assert_eq!(client.phase().await, SessionPhase::Idle);

    client.stop().await;
}
