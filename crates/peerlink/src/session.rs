//! Peer negotiation state machine
//!
//! One [`PeerSession`] drives the offer/answer/candidate exchange for
//! exactly one remote peer relationship. Inbound signals become
//! connectivity-agent calls, agent events become outbound signals, and
//! the phase field is the single source of truth checked at the start
//! of every handler — the relay does not promise sender ordering, so
//! stale and out-of-order signals are normal and are dropped or
//! buffered rather than treated as failures.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use crate::channel::DataChannelManager;
use crate::transport::{AgentEvent, ConnectivityAgent, DataChannel, TransportError};
use crate::types::{IceCandidate, SessionConfig, SessionDescription, SessionPhase, SignalPayload};

#[derive(Debug, Error)]
pub enum SessionError {
    /// An operation requiring a local identity ran before one was assigned
    #[error("no local identity assigned yet")]
    NotReady,
    /// Description creation or application failed
    #[error("negotiation failed: {0}")]
    Negotiation(#[from] TransportError),
    /// The outbound signaling queue is gone
    #[error("signaling channel closed")]
    SignalingClosed,
}

/// Negotiation state machine for one remote peer relationship
pub struct PeerSession<A> {
    agent: Arc<A>,
    channels: Arc<DataChannelManager>,
    /// Outbound signals, drained by the facade into the signaling link
    signal_tx: mpsc::Sender<SignalPayload>,
    config: SessionConfig,
    /// Relay-assigned identity; unset until the relay confirms it
    local_id: RwLock<Option<String>>,
    /// The one active remote peer, if any
    target_id: RwLock<Option<String>>,
    phase: RwLock<SessionPhase>,
    /// Guards the never-apply-a-remote-description-twice invariant
    remote_desc_set: RwLock<bool>,
    /// Candidates that arrived before the remote description, tagged
    /// with the source they came from
    pending_candidates: RwLock<Vec<(String, IceCandidate)>>,
}

impl<A: ConnectivityAgent + 'static> PeerSession<A> {
    pub fn new(
        agent: Arc<A>,
        channels: Arc<DataChannelManager>,
        signal_tx: mpsc::Sender<SignalPayload>,
        config: SessionConfig,
    ) -> Self {
        Self {
            agent,
            channels,
            signal_tx,
            config,
            local_id: RwLock::new(None),
            target_id: RwLock::new(None),
            phase: RwLock::new(SessionPhase::Idle),
            remote_desc_set: RwLock::new(false),
            pending_candidates: RwLock::new(Vec::new()),
        }
    }

    /// Record the relay-assigned identity; the session can initiate
    /// once this has happened
    pub async fn assign_local_id(&self, id: String) {
        *self.local_id.write().await = Some(id);
    }

    pub async fn local_id(&self) -> Option<String> {
        self.local_id.read().await.clone()
    }

    pub async fn target_id(&self) -> Option<String> {
        self.target_id.read().await.clone()
    }

    pub async fn phase(&self) -> SessionPhase {
        *self.phase.read().await
    }

    /// Buffered candidates not yet applied (awaiting the remote description)
    pub async fn pending_candidate_count(&self) -> usize {
        self.pending_candidates.read().await.len()
    }

    /// Start a negotiation towards `target_id` as initiator
    ///
    /// Requires an assigned local identity. On success the phase moves
    /// Idle → OfferSent; on any failure in the chain the session rolls
    /// back to Idle with the target and half-created channel cleared.
    pub async fn initiate(&self, target_id: &str) -> Result<(), SessionError> {
        let Some(local_id) = self.local_id.read().await.clone() else {
            warn!("[Session] connect refused: no local identity assigned yet");
            return Err(SessionError::NotReady);
        };

        *self.target_id.write().await = Some(target_id.to_string());
        match self.send_offer(&local_id, target_id).await {
            Ok(()) => {
                *self.phase.write().await = SessionPhase::OfferSent;
                Ok(())
            }
            Err(err) => {
                warn!("[Session] connect to {target_id} failed: {err}");
                self.reset().await;
                Err(err)
            }
        }
    }

    async fn send_offer(&self, local_id: &str, target_id: &str) -> Result<(), SessionError> {
        // Initiator owns channel creation; it must exist before the
        // offer so the channel is part of the negotiated description.
        self.channels.create_as_initiator(self.agent.as_ref()).await?;

        let offer = self.agent.create_offer().await?;
        self.agent.set_local_description(offer.clone()).await?;
        self.send_signal(SignalPayload::Offer {
            peer_id: local_id.to_string(),
            target_peer_id: target_id.to_string(),
            sdp: offer.sdp,
        })
        .await
    }

    /// Dispatch one inbound signal from the relay
    ///
    /// Never fails outward: bad or stale signals are logged and dropped,
    /// negotiation failures reset the session to Idle.
    pub async fn handle_signal(&self, source_id: &str, payload: SignalPayload) {
        if *self.phase.read().await == SessionPhase::Closed {
            return;
        }

        // One active remote at a time: a competing source is rejected,
        // not silently adopted.
        if let Some(active) = self.target_id.read().await.clone() {
            if active != source_id {
                warn!("[Session] ignoring signal from {source_id}: already engaged with {active}");
                return;
            }
        }

        match payload {
            SignalPayload::Offer { sdp, .. } => self.handle_offer(source_id, sdp).await,
            SignalPayload::Answer { sdp, .. } => self.handle_answer(source_id, sdp).await,
            SignalPayload::Candidate {
                candidate,
                sdp_m_line_index,
                sdp_mid,
                ..
            } => {
                let candidate = IceCandidate {
                    candidate,
                    sdp_m_line_index,
                    sdp_mid,
                };
                self.handle_candidate(source_id, candidate).await;
            }
        }
    }

    /// Inbound offer: the receiver becomes the answerer unconditionally
    async fn handle_offer(&self, source_id: &str, sdp: String) {
        if *self.remote_desc_set.read().await {
            warn!("[Session] stale offer from {source_id} dropped: remote description already applied");
            return;
        }

        *self.target_id.write().await = Some(source_id.to_string());
        *self.phase.write().await = SessionPhase::OfferReceived;

        if let Err(err) = self.accept_offer(source_id, sdp).await {
            warn!("[Session] failed to accept offer from {source_id}: {err}");
            self.reset().await;
        }
    }

    async fn accept_offer(&self, source_id: &str, sdp: String) -> Result<(), SessionError> {
        let local_id = self.local_id.read().await.clone().ok_or(SessionError::NotReady)?;

        self.agent
            .set_remote_description(SessionDescription::offer(sdp))
            .await?;
        *self.remote_desc_set.write().await = true;
        self.drain_pending_candidates().await;

        let answer = self.agent.create_answer().await?;
        self.agent.set_local_description(answer.clone()).await?;
        *self.phase.write().await = SessionPhase::AnswerSent;

        self.send_signal(SignalPayload::Answer {
            peer_id: local_id,
            target_peer_id: source_id.to_string(),
            sdp: answer.sdp,
        })
        .await?;
        // the channel may already have surfaced and advanced the phase;
        // never step backwards from Established
        let mut phase = self.phase.write().await;
        if *phase == SessionPhase::AnswerSent {
            *phase = SessionPhase::Negotiating;
        }
        Ok(())
    }

    /// Inbound answer: only valid while our own offer is outstanding
    async fn handle_answer(&self, source_id: &str, sdp: String) {
        if *self.phase.read().await != SessionPhase::OfferSent {
            warn!("[Session] answer from {source_id} dropped: no outstanding offer");
            return;
        }

        *self.phase.write().await = SessionPhase::AnswerReceived;
        match self
            .agent
            .set_remote_description(SessionDescription::answer(sdp))
            .await
        {
            Ok(()) => {
                *self.remote_desc_set.write().await = true;
                self.drain_pending_candidates().await;
                // applying the answer can open the channel concurrently;
                // never step backwards from Established
                let mut phase = self.phase.write().await;
                if *phase == SessionPhase::AnswerReceived {
                    *phase = SessionPhase::Negotiating;
                }
            }
            Err(err) => {
                warn!("[Session] failed to apply answer from {source_id}: {err}");
                self.reset().await;
            }
        }
    }

    /// Inbound candidate: applied if the remote description is set,
    /// buffered otherwise. A rejected candidate never aborts the
    /// negotiation.
    async fn handle_candidate(&self, source_id: &str, candidate: IceCandidate) {
        if *self.remote_desc_set.read().await {
            if let Err(err) = self.agent.add_candidate(candidate).await {
                warn!("[Session] candidate from {source_id} rejected: {err}");
            }
        } else {
            if self.config.debug {
                debug!("[Session] buffering candidate from {source_id}: no remote description yet");
            }
            self.pending_candidates
                .write()
                .await
                .push((source_id.to_string(), candidate));
        }
    }

    /// Apply buffered candidates for the now-active target, in arrival order
    async fn drain_pending_candidates(&self) {
        let target = self.target_id.read().await.clone();
        let drained: Vec<_> = self.pending_candidates.write().await.drain(..).collect();

        for (source_id, candidate) in drained {
            if Some(&source_id) != target.as_ref() {
                debug!("[Session] dropping buffered candidate from {source_id}: not the active peer");
                continue;
            }
            if let Err(err) = self.agent.add_candidate(candidate).await {
                warn!("[Session] buffered candidate rejected: {err}");
            }
        }
    }

    /// Dispatch one event from the connectivity agent
    pub async fn handle_agent_event(&self, event: AgentEvent) {
        match event {
            AgentEvent::CandidateDiscovered(candidate) => {
                let target = self.target_id.read().await.clone();
                let local = self.local_id.read().await.clone();
                let (Some(target), Some(local)) = (target, local) else {
                    // no one to send it to yet
                    return;
                };
                let payload = SignalPayload::Candidate {
                    peer_id: local,
                    target_peer_id: target,
                    candidate: candidate.candidate,
                    sdp_m_line_index: candidate.sdp_m_line_index,
                    sdp_mid: candidate.sdp_mid,
                };
                if let Err(err) = self.send_signal(payload).await {
                    warn!("[Session] failed to forward local candidate: {err}");
                }
            }
            AgentEvent::ChannelSurfaced(channel) => {
                if *self.phase.read().await == SessionPhase::Closed {
                    channel.close().await;
                    return;
                }
                self.channels.accept_incoming(channel).await;
                *self.phase.write().await = SessionPhase::Established;
            }
        }
    }

    /// The data channel reached Open (either role)
    pub async fn on_channel_open(&self) {
        let mut phase = self.phase.write().await;
        if *phase != SessionPhase::Closed {
            *phase = SessionPhase::Established;
        }
    }

    /// The data channel closed; the session falls back to Idle unless
    /// the consumer already tore it down
    pub async fn on_channel_closed(&self) {
        if *self.phase.read().await == SessionPhase::Closed {
            return;
        }
        self.reset().await;
    }

    /// Abandon the current negotiation: back to Idle with no target, no
    /// remote description, no buffered candidates, no channel
    pub async fn reset(&self) {
        *self.phase.write().await = SessionPhase::Idle;
        *self.target_id.write().await = None;
        *self.remote_desc_set.write().await = false;
        self.pending_candidates.write().await.clear();
        self.channels.discard().await;
    }

    /// Consumer teardown; the session accepts no further signals
    pub async fn close(&self) {
        *self.phase.write().await = SessionPhase::Closed;
        *self.target_id.write().await = None;
        self.pending_candidates.write().await.clear();
    }

    async fn send_signal(&self, payload: SignalPayload) -> Result<(), SessionError> {
        self.signal_tx
            .send(payload)
            .await
            .map_err(|_| SessionError::SignalingClosed)
    }
}
