// ============================
// crates/mesh-client/src/engine.rs
// ============================
//! Seam between the mesh protocol and whatever produces media.
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use meetmesh_common::{ConnectionId, NegotiationMessage};
use parking_lot::Mutex;

use crate::error::{MeshError, Result};

/// Connectivity candidate exchanged between peers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_m_line_index: Option<u16>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
        }
    }

    pub(crate) fn into_message(self) -> NegotiationMessage {
        NegotiationMessage::Candidate {
            candidate: self.candidate,
            sdp_mid: self.sdp_mid,
            sdp_m_line_index: self.sdp_m_line_index,
        }
    }
}

/// Peer connection factory used by a [`crate::MeshSession`].
///
/// One logical connection exists per remote peer. `close` must release it
/// and make the next `create_offer`/`accept_offer` for that peer start over.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Create a fresh connection to `peer` and return its local offer
    async fn create_offer(&self, peer: ConnectionId) -> Result<String>;

    /// Apply a remote offer and return the local answer
    async fn accept_offer(&self, peer: ConnectionId, sdp: &str) -> Result<String>;

    /// Apply the remote answer to an offer created earlier
    async fn apply_answer(&self, peer: ConnectionId, sdp: &str) -> Result<()>;

    /// Add a remote candidate; only called after the remote description is set
    async fn add_candidate(&self, peer: ConnectionId, candidate: &IceCandidate) -> Result<()>;

    /// Release the connection to `peer`, if any
    async fn close(&self, peer: ConnectionId);
}

#[async_trait]
impl<T: MediaEngine + ?Sized> MediaEngine for Arc<T> {
    async fn create_offer(&self, peer: ConnectionId) -> Result<String> {
        (**self).create_offer(peer).await
    }

    async fn accept_offer(&self, peer: ConnectionId, sdp: &str) -> Result<String> {
        (**self).accept_offer(peer, sdp).await
    }

    async fn apply_answer(&self, peer: ConnectionId, sdp: &str) -> Result<()> {
        (**self).apply_answer(peer, sdp).await
    }

    async fn add_candidate(&self, peer: ConnectionId, candidate: &IceCandidate) -> Result<()> {
        (**self).add_candidate(peer, candidate).await
    }

    async fn close(&self, peer: ConnectionId) {
        (**self).close(peer).await;
    }
}

/// Things the engine reports on its own schedule
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A local candidate for `peer` was gathered
    LocalCandidate { peer: ConnectionId, candidate: IceCandidate },
    /// First remote media arrived from `peer`
    RemoteMedia { peer: ConnectionId },
    /// The connection to `peer` broke down
    Failed { peer: ConnectionId, reason: String },
}

/// One recorded call into a [`LoopbackEngine`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    CreateOffer(ConnectionId),
    AcceptOffer(ConnectionId, String),
    ApplyAnswer(ConnectionId, String),
    AddCandidate(ConnectionId, String),
    Close(ConnectionId),
}

/// Engine without media: fabricates session descriptions and records every
/// call. Useful for signaling-only participants and for tests.
#[derive(Debug, Default)]
pub struct LoopbackEngine {
    calls: Mutex<Vec<EngineCall>>,
    failing_offers: AtomicU32,
}

impl LoopbackEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` calls to `create_offer` fail
    pub fn fail_next_offers(&self, n: u32) {
        self.failing_offers.store(n, Ordering::SeqCst);
    }

    /// Every call so far, in order
    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().clone()
    }

    /// Peers a connection was closed for
    pub fn closed(&self) -> Vec<ConnectionId> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                EngineCall::Close(peer) => Some(*peer),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: EngineCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl MediaEngine for LoopbackEngine {
    async fn create_offer(&self, peer: ConnectionId) -> Result<String> {
        self.record(EngineCall::CreateOffer(peer));
        let failing = self
            .failing_offers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(MeshError::Engine(format!("offer to {peer} failed")));
        }
        Ok(format!("offer-for-{peer}"))
    }

    async fn accept_offer(&self, peer: ConnectionId, sdp: &str) -> Result<String> {
        self.record(EngineCall::AcceptOffer(peer, sdp.to_string()));
        Ok(format!("answer-for-{peer}"))
    }

    async fn apply_answer(&self, peer: ConnectionId, sdp: &str) -> Result<()> {
        self.record(EngineCall::ApplyAnswer(peer, sdp.to_string()));
        Ok(())
    }

    async fn add_candidate(&self, peer: ConnectionId, candidate: &IceCandidate) -> Result<()> {
        self.record(EngineCall::AddCandidate(peer, candidate.candidate.clone()));
        Ok(())
    }

    async fn close(&self, peer: ConnectionId) {
        self.record(EngineCall::Close(peer));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_loopback_fails_requested_offers_only() {
        let engine = LoopbackEngine::new();
        let peer = ConnectionId::new_v4();
        engine.fail_next_offers(2);

        assert!(engine.create_offer(peer).await.is_err());
        assert!(engine.create_offer(peer).await.is_err());
        assert!(engine.create_offer(peer).await.is_ok());
        assert_eq!(engine.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_arc_engine_forwards() {
        let engine = Arc::new(LoopbackEngine::new());
        let peer = ConnectionId::new_v4();
        let shared = engine.clone();

        shared.close(peer).await;
        assert_eq!(engine.closed(), vec![peer]);
    }
}
