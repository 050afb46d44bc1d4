// ============================
// crates/mesh-client/src/link.rs
// ============================
//! Per-peer negotiation state.
use meetmesh_common::ConnectionId;
use tokio::time::Instant;

use crate::engine::IceCandidate;

/// Which side of the pair sends the offer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

/// Position inside an ongoing negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationStage {
    OfferSent,
    OfferReceived,
    AnswerSent,
    AnswerReceived,
}

/// Coarse state of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Negotiating(NegotiationStage),
    Connected,
    Failed,
    Closed,
}

impl LinkState {
    pub fn is_negotiating(self) -> bool {
        matches!(self, LinkState::Negotiating(_))
    }
}

/// Connection toward one remote participant
#[derive(Debug)]
pub struct PeerLink {
    peer: ConnectionId,
    role: Role,
    state: LinkState,
    /// Offer round this link is on; starts at 1
    attempt: u32,
    remote_description_set: bool,
    pending_candidates: Vec<IceCandidate>,
    negotiation_started: Option<Instant>,
}

impl PeerLink {
    pub fn new(peer: ConnectionId, role: Role) -> Self {
        Self {
            peer,
            role,
            state: LinkState::Idle,
            attempt: 0,
            remote_description_set: false,
            pending_candidates: Vec::new(),
            negotiation_started: None,
        }
    }

    pub fn peer(&self) -> ConnectionId {
        self.peer
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    /// Start offer round `attempt`, discarding anything from earlier rounds
    pub(crate) fn restart(&mut self, attempt: u32) {
        self.attempt = attempt;
        self.state = LinkState::Idle;
        self.remote_description_set = false;
        self.pending_candidates.clear();
        self.negotiation_started = None;
    }

    /// Adopt the peer's round number, keeping buffered candidates
    pub(crate) fn set_attempt(&mut self, attempt: u32) {
        self.attempt = attempt;
    }

    /// Move to `stage`; the negotiation clock starts on the first stage
    pub(crate) fn advance(&mut self, stage: NegotiationStage, now: Instant) {
        if self.state == LinkState::Closed {
            return;
        }
        if !self.state.is_negotiating() {
            self.negotiation_started = Some(now);
        }
        self.state = LinkState::Negotiating(stage);
    }

    /// First remote media. Only a round whose descriptions are both
    /// applied can connect; media in any other state belongs to an earlier
    /// round and is ignored. Returns true if this changed the state.
    pub(crate) fn connect(&mut self) -> bool {
        match self.state {
            LinkState::Negotiating(NegotiationStage::AnswerSent | NegotiationStage::AnswerReceived) => {
                self.state = LinkState::Connected;
                self.negotiation_started = None;
                true
            },
            _ => false,
        }
    }

    /// Returns true if this changed the state
    pub(crate) fn fail(&mut self) -> bool {
        match self.state {
            LinkState::Failed | LinkState::Closed => false,
            _ => {
                self.state = LinkState::Failed;
                self.negotiation_started = None;
                true
            },
        }
    }

    pub(crate) fn close(&mut self) {
        self.state = LinkState::Closed;
        self.pending_candidates.clear();
        self.negotiation_started = None;
    }

    /// Whether a negotiation began at or before `deadline`
    pub(crate) fn stalled_since(&self, deadline: Instant) -> bool {
        self.state.is_negotiating()
            && self
                .negotiation_started
                .is_some_and(|started| started <= deadline)
    }

    pub(crate) fn remote_description_set(&self) -> bool {
        self.remote_description_set
    }

    /// Mark the remote description applied and hand back buffered candidates
    pub(crate) fn set_remote_description(&mut self) -> Vec<IceCandidate> {
        self.remote_description_set = true;
        std::mem::take(&mut self.pending_candidates)
    }

    pub(crate) fn buffer_candidate(&mut self, candidate: IceCandidate) {
        self.pending_candidates.push(candidate);
    }
}
