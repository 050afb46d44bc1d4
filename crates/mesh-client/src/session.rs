// ============================
// crates/mesh-client/src/session.rs
// ============================
//! Mesh protocol state for one participant.
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use meetmesh_common::{
    ClientToServer, ConnectionId, NegotiationMessage, ParticipantInfo, RoomKey, ServerToClient,
    SignalPayload,
};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::engine::{EngineEvent, IceCandidate, MediaEngine};
use crate::error::{MeshError, Result};
use crate::link::{LinkState, NegotiationStage, PeerLink, Role};

/// Tunables of the mesh protocol
#[derive(Debug, Clone)]
pub struct MeshConfig {
    /// A negotiation older than this is failed by `expire_stalled`
    pub negotiation_timeout: Duration,
    /// Total offer rounds an initiator tries before abandoning a peer
    pub max_attempts: u32,
    /// Interval at which the client sweeps stalled negotiations
    pub tick: Duration,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            negotiation_timeout: Duration::from_secs(10),
            max_attempts: 3,
            tick: Duration::from_secs(1),
        }
    }
}

/// Notifications for the embedding application
#[derive(Debug, Clone, PartialEq)]
pub enum MeshEvent {
    /// Our join was confirmed; `roster` is who was already there
    Joined { room_key: RoomKey, roster: Vec<ParticipantInfo> },
    /// Someone joined after us; they will send the offer
    PeerJoined { participant: ParticipantInfo },
    /// First remote media from `peer`
    Connected { peer: ConnectionId },
    /// A negotiation round failed
    Failed { peer: ConnectionId, attempt: u32, reason: String },
    /// Retries exhausted; no further offers will be made to `peer`
    Abandoned { peer: ConnectionId, attempts: u32 },
    /// Link torn down
    Closed { peer: ConnectionId },
    /// Our leave was confirmed
    Left { room_key: RoomKey },
}

/// Protocol state for one participant: one [`PeerLink`] per remote peer.
///
/// Frames for the server go out through `outbound`; the session never
/// touches a socket itself.
pub struct MeshSession<E> {
    engine: E,
    outbound: mpsc::UnboundedSender<ClientToServer>,
    events: mpsc::UnboundedSender<MeshEvent>,
    config: MeshConfig,
    local_id: Option<ConnectionId>,
    room_key: Option<RoomKey>,
    links: HashMap<ConnectionId, PeerLink>,
    /// Peers we gave up initiating toward; their signals are ignored
    abandoned: HashSet<ConnectionId>,
}

impl<E: MediaEngine> MeshSession<E> {
    pub fn new(
        engine: E,
        outbound: mpsc::UnboundedSender<ClientToServer>,
        events: mpsc::UnboundedSender<MeshEvent>,
        config: MeshConfig,
    ) -> Self {
        Self {
            engine,
            outbound,
            events,
            config,
            local_id: None,
            room_key: None,
            links: HashMap::new(),
            abandoned: HashSet::new(),
        }
    }

    pub fn local_id(&self) -> Option<ConnectionId> {
        self.local_id
    }

    pub fn room_key(&self) -> Option<&str> {
        self.room_key.as_deref()
    }

    pub fn state_of(&self, peer: ConnectionId) -> Option<LinkState> {
        self.links.get(&peer).map(PeerLink::state)
    }

    pub fn link(&self, peer: ConnectionId) -> Option<&PeerLink> {
        self.links.get(&peer)
    }

    /// Peers this session sent (or is sending) offers to, sorted
    pub fn initiated_toward(&self) -> Vec<ConnectionId> {
        let mut peers: Vec<_> = self
            .links
            .values()
            .filter(|link| link.role() == Role::Initiator)
            .map(PeerLink::peer)
            .collect();
        peers.sort();
        peers
    }

    /// Whether retries toward `peer` ran out
    pub fn is_abandoned(&self, peer: ConnectionId) -> bool {
        self.abandoned.contains(&peer)
    }

    /// Peers with a link in any state, sorted
    pub fn peers(&self) -> Vec<ConnectionId> {
        let mut peers: Vec<_> = self.links.keys().copied().collect();
        peers.sort();
        peers
    }

    /// Ask the server to put us into `room_key`
    pub fn join(&self, room_key: &str, display_name: &str) -> Result<()> {
        self.send(ClientToServer::JoinRoom {
            room_key: room_key.to_string(),
            display_name: display_name.to_string(),
        })
    }

    /// Leave the room and tear down every link
    pub async fn leave(&mut self) -> Result<()> {
        self.close_all().await;
        self.send(ClientToServer::LeaveRoom)
    }

    /// Apply one frame received from the server
    pub async fn handle_server_message(&mut self, message: ServerToClient) -> Result<()> {
        match message {
            ServerToClient::Welcome { connection_id } => {
                tracing::debug!(%connection_id, "assigned connection id");
                self.local_id = Some(connection_id);
            },
            ServerToClient::RoomJoined { room_key, roster } => {
                if self.room_key.as_deref().is_some_and(|current| current != room_key) {
                    self.close_all().await;
                }
                self.room_key = Some(room_key.clone());
                let peers: Vec<_> = roster
                    .iter()
                    .map(|p| p.connection_id)
                    .filter(|id| Some(*id) != self.local_id)
                    .collect();
                self.emit(MeshEvent::Joined { room_key, roster });
                // we joined last, so we offer to everyone already present
                for peer in peers {
                    if !self.links.contains_key(&peer) && !self.abandoned.contains(&peer) {
                        self.offer_to(peer, 1).await;
                    }
                }
            },
            ServerToClient::ParticipantJoined { participant, .. } => {
                let peer = participant.connection_id;
                if Some(peer) != self.local_id {
                    self.links
                        .entry(peer)
                        .or_insert_with(|| PeerLink::new(peer, Role::Responder));
                    self.emit(MeshEvent::PeerJoined { participant });
                }
            },
            ServerToClient::ParticipantLeft { connection_id, .. } => {
                self.teardown(connection_id).await;
            },
            ServerToClient::RoomLeft { room_key } => {
                self.close_all().await;
                self.emit(MeshEvent::Left { room_key });
            },
            ServerToClient::Signal { from, payload, .. } => {
                self.handle_signal(from, &payload).await;
            },
            ServerToClient::MalformedMessage { err_msg } => {
                tracing::warn!(error = %err_msg, "server could not parse our frame");
            },
            ServerToClient::Error { code, message } => {
                return Err(MeshError::Rejected { code, message });
            },
        }
        Ok(())
    }

    /// Apply one event reported by the media engine
    pub async fn handle_engine_event(&mut self, event: EngineEvent) -> Result<()> {
        match event {
            EngineEvent::LocalCandidate { peer, candidate } => {
                self.on_local_candidate(peer, candidate)
            },
            EngineEvent::RemoteMedia { peer } => {
                self.on_media_received(peer);
                Ok(())
            },
            EngineEvent::Failed { peer, reason } => {
                self.on_negotiation_failed(peer, &reason).await;
                Ok(())
            },
        }
    }

    /// Forward a locally gathered candidate to `peer`
    pub fn on_local_candidate(&self, peer: ConnectionId, candidate: IceCandidate) -> Result<()> {
        if !self.links.contains_key(&peer) {
            return Err(MeshError::UnknownPeer(peer));
        }
        self.send_negotiation(peer, candidate.into_message())
    }

    /// First remote media from `peer`
    pub fn on_media_received(&mut self, peer: ConnectionId) {
        if self.links.get_mut(&peer).is_some_and(PeerLink::connect) {
            tracing::info!(%peer, "peer connected");
            self.emit(MeshEvent::Connected { peer });
        }
    }

    /// Fail the current round with `peer`. Initiators re-offer until
    /// `max_attempts` rounds were tried; responders wait for a fresh offer.
    pub async fn on_negotiation_failed(&mut self, peer: ConnectionId, reason: &str) {
        if let Some(next) = self.record_failure(peer, reason).await {
            self.offer_to(peer, next).await;
        }
    }

    /// Fail every negotiation that started at or before `now - timeout`
    pub async fn expire_stalled(&mut self, now: Instant) {
        let Some(deadline) = now.checked_sub(self.config.negotiation_timeout) else {
            return;
        };
        let stalled: Vec<_> = self
            .links
            .values()
            .filter(|link| link.stalled_since(deadline))
            .map(PeerLink::peer)
            .collect();
        for peer in stalled {
            self.on_negotiation_failed(peer, "negotiation timed out").await;
        }
    }

    /// Tear down every link, e.g. on local shutdown
    pub async fn close_all(&mut self) {
        let peers = self.peers();
        for peer in peers {
            self.teardown(peer).await;
        }
        self.abandoned.clear();
        self.room_key = None;
    }

    async fn handle_signal(&mut self, from: ConnectionId, payload: &SignalPayload) {
        let message = match NegotiationMessage::from_payload(payload) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(%from, error = %e, "ignoring unrecognized signal");
                return;
            },
        };

        match message {
            NegotiationMessage::Offer { sdp, attempt } => self.on_offer(from, &sdp, attempt).await,
            NegotiationMessage::Answer { sdp, attempt } => {
                self.on_answer(from, &sdp, attempt).await;
            },
            NegotiationMessage::Candidate {
                candidate,
                sdp_mid,
                sdp_m_line_index,
            } => {
                let candidate = IceCandidate {
                    candidate,
                    sdp_mid,
                    sdp_m_line_index,
                };
                self.on_remote_candidate(from, candidate).await;
            },
        }
    }

    async fn offer_to(&mut self, peer: ConnectionId, mut attempt: u32) {
        loop {
            self.links
                .entry(peer)
                .or_insert_with(|| PeerLink::new(peer, Role::Initiator))
                .restart(attempt);

            match self.engine.create_offer(peer).await {
                Ok(sdp) => {
                    if let Some(link) = self.links.get_mut(&peer) {
                        link.advance(NegotiationStage::OfferSent, Instant::now());
                    }
                    tracing::debug!(%peer, attempt, "offer sent");
                    if let Err(e) = self.send_negotiation(peer, NegotiationMessage::Offer { sdp, attempt }) {
                        tracing::warn!(%peer, error = %e, "offer not sent");
                    }
                    return;
                },
                Err(e) => match self.record_failure(peer, &e.to_string()).await {
                    Some(next) => attempt = next,
                    None => return,
                },
            }
        }
    }

    async fn on_offer(&mut self, from: ConnectionId, sdp: &str, attempt: u32) {
        if self.abandoned.contains(&from) {
            tracing::debug!(%from, "offer from an abandoned peer");
            return;
        }
        let link = self
            .links
            .entry(from)
            .or_insert_with(|| PeerLink::new(from, Role::Responder));
        if link.role() == Role::Initiator {
            tracing::warn!(%from, "offer from a peer we initiate toward; ignoring");
            return;
        }
        if attempt < link.attempt() {
            tracing::debug!(%from, attempt, current = link.attempt(), "stale offer");
            return;
        }
        let renegotiation = link.state() != LinkState::Idle;
        if renegotiation {
            // candidates of a round always follow its offer
            link.restart(attempt);
        } else {
            link.set_attempt(attempt);
        }
        link.advance(NegotiationStage::OfferReceived, Instant::now());
        if renegotiation {
            self.engine.close(from).await;
        }

        match self.engine.accept_offer(from, sdp).await {
            Ok(answer) => {
                let flushed = match self.links.get_mut(&from) {
                    Some(link) => {
                        link.advance(NegotiationStage::AnswerSent, Instant::now());
                        link.set_remote_description()
                    },
                    None => return,
                };
                self.apply_candidates(from, flushed).await;
                if let Err(e) = self.send_negotiation(from, NegotiationMessage::Answer { sdp: answer, attempt }) {
                    tracing::warn!(%from, error = %e, "answer not sent");
                }
            },
            Err(e) => self.on_negotiation_failed(from, &e.to_string()).await,
        }
    }

    async fn on_answer(&mut self, from: ConnectionId, sdp: &str, attempt: u32) {
        let Some(link) = self.links.get(&from) else {
            tracing::debug!(%from, "answer without a link");
            return;
        };
        if link.role() != Role::Initiator
            || link.attempt() != attempt
            || link.state() != LinkState::Negotiating(NegotiationStage::OfferSent)
        {
            tracing::debug!(%from, attempt, "ignoring stale answer");
            return;
        }

        match self.engine.apply_answer(from, sdp).await {
            Ok(()) => {
                let flushed = match self.links.get_mut(&from) {
                    Some(link) => {
                        link.advance(NegotiationStage::AnswerReceived, Instant::now());
                        link.set_remote_description()
                    },
                    None => return,
                };
                self.apply_candidates(from, flushed).await;
            },
            Err(e) => self.on_negotiation_failed(from, &e.to_string()).await,
        }
    }

    async fn on_remote_candidate(&mut self, from: ConnectionId, candidate: IceCandidate) {
        if self.abandoned.contains(&from) {
            tracing::debug!(%from, "candidate from an abandoned peer");
            return;
        }
        let link = self
            .links
            .entry(from)
            .or_insert_with(|| PeerLink::new(from, Role::Responder));
        if link.state() == LinkState::Closed {
            return;
        }
        if link.remote_description_set() {
            self.apply_candidates(from, vec![candidate]).await;
        } else {
            link.buffer_candidate(candidate);
        }
    }

    async fn apply_candidates(&self, peer: ConnectionId, candidates: Vec<IceCandidate>) {
        for candidate in candidates {
            if let Err(e) = self.engine.add_candidate(peer, &candidate).await {
                tracing::debug!(%peer, error = %e, "candidate rejected");
            }
        }
    }

    /// Returns the next attempt number if the initiator should re-offer
    async fn record_failure(&mut self, peer: ConnectionId, reason: &str) -> Option<u32> {
        let link = self.links.get_mut(&peer)?;
        if !link.fail() {
            return None;
        }
        let (role, attempt) = (link.role(), link.attempt());
        tracing::warn!(%peer, attempt, reason, "negotiation failed");
        self.emit(MeshEvent::Failed {
            peer,
            attempt,
            reason: reason.to_string(),
        });
        self.engine.close(peer).await;

        match role {
            Role::Initiator if attempt < self.config.max_attempts => Some(attempt + 1),
            Role::Initiator => {
                self.links.remove(&peer);
                self.abandoned.insert(peer);
                tracing::warn!(%peer, attempts = attempt, "giving up on peer");
                self.emit(MeshEvent::Abandoned {
                    peer,
                    attempts: attempt,
                });
                None
            },
            Role::Responder => None,
        }
    }

    async fn teardown(&mut self, peer: ConnectionId) {
        self.abandoned.remove(&peer);
        let Some(mut link) = self.links.remove(&peer) else {
            return;
        };
        link.close();
        self.engine.close(peer).await;
        tracing::debug!(%peer, "link closed");
        self.emit(MeshEvent::Closed { peer });
    }

    fn send_negotiation(&self, peer: ConnectionId, message: NegotiationMessage) -> Result<()> {
        self.send(ClientToServer::Signal {
            to: peer,
            from: self.local_id,
            payload: message.into_payload(),
        })
    }

    fn send(&self, message: ClientToServer) -> Result<()> {
        self.outbound
            .send(message)
            .map_err(|_| MeshError::ChannelClosed)
    }

    fn emit(&self, event: MeshEvent) {
        // nobody listening is fine
        let _ = self.events.send(event);
    }
}
