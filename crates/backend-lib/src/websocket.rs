// ==================
// crates/backend-lib/src/websocket.rs
// ==================
//! WebSocket Handler Module
//!
//! Per-connection message dispatch for the signaling endpoint. A
//! `WebSocketHandler` is created for every socket and owns that socket's
//! connection id. It translates validated client frames into calls on the
//! shared room directory and signal relay.
//!
//! Most effects are delivered asynchronously through the connection's
//! outbound channel (room actors push `RoomJoined`, `ParticipantJoined`
//! and friends themselves), so `handle_message` usually has no direct reply.
//! Only rejected frames produce one.

use std::sync::Arc;

use meetmesh_common::{ClientToServer, ConnectionId, ServerToClient};

use crate::error::AppError;
use crate::relay::{RelayOutcome, SignalEnvelope};
use crate::storage::BlobStore;
use crate::validation;
use crate::AppState;

/// Error code sent for frames that parse but carry invalid fields
pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";

/// WebSocket handler for processing messages of one connection
pub struct WebSocketHandler<S> {
    state: Arc<AppState<S>>,
    connection_id: ConnectionId,
}

impl<S: BlobStore> WebSocketHandler<S> {
    pub fn new(state: Arc<AppState<S>>, connection_id: ConnectionId) -> Self {
        Self {
            state,
            connection_id,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Handle one parsed client frame.
    ///
    /// Returns a frame to send straight back, if any. Errors are service
    /// failures (not bad input) and are reported by the caller.
    #[tracing::instrument(skip(self, msg), fields(connection = %self.connection_id))]
    pub async fn handle_message(
        &self,
        msg: ClientToServer,
    ) -> Result<Option<ServerToClient>, AppError> {
        if let Err(e) = validation::validate_client_message(&msg, self.connection_id) {
            tracing::debug!(error = %e, "rejected client frame");
            return Ok(Some(ServerToClient::Error {
                code: VALIDATION_ERROR.to_string(),
                message: e.to_string(),
            }));
        }

        match msg {
            ClientToServer::JoinRoom {
                room_key,
                display_name,
            } => {
                let display_name = validation::validate_display_name(&display_name)?;
                let roster = self
                    .state
                    .rooms
                    .join(&room_key, self.connection_id, display_name)
                    .await?;
                tracing::info!(room = %room_key, peers = roster.len(), "joined room");
                Ok(None)
            },
            ClientToServer::LeaveRoom => {
                if self.state.rooms.leave(self.connection_id).await? {
                    tracing::info!("left room");
                }
                Ok(None)
            },
            ClientToServer::Signal { to, payload, .. } => {
                let outcome = self.state.relay.relay(SignalEnvelope {
                    to,
                    from: self.connection_id,
                    payload,
                });
                if outcome != RelayOutcome::Delivered {
                    tracing::debug!(%to, ?outcome, "signal not delivered");
                }
                Ok(None)
            },
        }
    }
}

/// Frame reported to the client when `handle_message` fails
pub fn error_frame(error: &AppError) -> ServerToClient {
    ServerToClient::Error {
        code: error.error_code().to_string(),
        message: error.sanitized_message(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::history::InMemoryHistory;
    use crate::storage::FlatFileStorage;
    use meetmesh_common::SignalPayload;
    use serde_json::json;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    type Rx = mpsc::UnboundedReceiver<ServerToClient>;

    /// Helper to set up shared state for testing
    fn setup() -> (Arc<AppState<FlatFileStorage>>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = FlatFileStorage::new(temp_dir.path()).unwrap();
        let state = Arc::new(AppState::new(
            storage,
            Arc::new(InMemoryHistory::new()),
            Settings::default(),
        ));
        (state, temp_dir)
    }

    fn connect(state: &Arc<AppState<FlatFileStorage>>) -> (WebSocketHandler<FlatFileStorage>, Rx) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = state.register_connection(tx);
        (WebSocketHandler::new(state.clone(), id), rx)
    }

    fn join(room: &str, name: &str) -> ClientToServer {
        ClientToServer::JoinRoom {
            room_key: room.to_string(),
            display_name: name.to_string(),
        }
    }

    #[tokio::test]
    async fn test_join_pushes_roster_without_direct_reply() {
        let (state, _temp_dir) = setup();
        let (alice, mut alice_rx) = connect(&state);

        let reply = alice.handle_message(join("demo", "  Alice  ")).await.unwrap();
        assert!(reply.is_none());
        assert_eq!(
            alice_rx.try_recv().unwrap(),
            ServerToClient::RoomJoined { room_key: "demo".into(), roster: vec![] }
        );

        let roster = state.rooms.roster("demo").await;
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].display_name, "Alice");
    }

    #[tokio::test]
    async fn test_invalid_join_is_rejected() {
        let (state, _temp_dir) = setup();
        let (alice, _alice_rx) = connect(&state);

        let reply = alice.handle_message(join("bad key!", "Alice")).await.unwrap();
        match reply {
            Some(ServerToClient::Error { code, .. }) => assert_eq!(code, VALIDATION_ERROR),
            other => panic!("expected validation error, got {other:?}"),
        }
        assert_eq!(state.rooms.room_count(), 0);
    }

    #[tokio::test]
    async fn test_spoofed_source_is_rejected() {
        let (state, _temp_dir) = setup();
        let (alice, _alice_rx) = connect(&state);
        let (bob, mut bob_rx) = connect(&state);
        alice.handle_message(join("demo", "Alice")).await.unwrap();
        bob.handle_message(join("demo", "Bob")).await.unwrap();
        while bob_rx.try_recv().is_ok() {}

        let spoofed = ClientToServer::Signal {
            to: bob.connection_id(),
            from: Some(ConnectionId::new_v4()),
            payload: SignalPayload(json!({"sdp": "x"})),
        };
        let reply = alice.handle_message(spoofed).await.unwrap();
        assert!(matches!(reply, Some(ServerToClient::Error { .. })));
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_signal_is_stamped_with_sender() {
        let (state, _temp_dir) = setup();
        let (alice, _alice_rx) = connect(&state);
        let (bob, mut bob_rx) = connect(&state);
        alice.handle_message(join("demo", "Alice")).await.unwrap();
        bob.handle_message(join("demo", "Bob")).await.unwrap();
        while bob_rx.try_recv().is_ok() {}

        let payload = SignalPayload(json!({"kind": "offer", "sdp": "v=0", "attempt": 1}));
        let reply = alice
            .handle_message(ClientToServer::Signal {
                to: bob.connection_id(),
                from: None,
                payload: payload.clone(),
            })
            .await
            .unwrap();
        assert!(reply.is_none());
        assert_eq!(
            bob_rx.try_recv().unwrap(),
            ServerToClient::Signal {
                to: bob.connection_id(),
                from: alice.connection_id(),
                payload,
            }
        );
    }

    #[tokio::test]
    async fn test_leave_is_idempotent() {
        let (state, _temp_dir) = setup();
        let (alice, mut alice_rx) = connect(&state);
        alice.handle_message(join("demo", "Alice")).await.unwrap();

        assert!(alice.handle_message(ClientToServer::LeaveRoom).await.unwrap().is_none());
        assert!(alice.handle_message(ClientToServer::LeaveRoom).await.unwrap().is_none());

        let frames: Vec<_> = std::iter::from_fn(|| alice_rx.try_recv().ok()).collect();
        assert_eq!(
            frames,
            vec![
                ServerToClient::RoomJoined { room_key: "demo".into(), roster: vec![] },
                ServerToClient::RoomLeft { room_key: "demo".into() },
            ]
        );
    }
}
