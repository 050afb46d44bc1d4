// ============================
// meetmesh-backend-lib/src/lib.rs
// ============================
//! Core functionality of the `MeetMesh` coordination server: connection
//! registry, room directory, signal relay, recording ingest and history.

pub mod config;
pub mod error;
pub mod handlers;
pub mod history;
pub mod metrics;
pub mod recording;
pub mod registry;
pub mod relay;
pub mod room;
pub mod room_actor;
pub mod storage;
pub mod validation;
pub mod websocket;
pub mod ws_router;

use std::sync::Arc;

use meetmesh_common::ConnectionId;

use crate::config::{HistoryBackend, Settings};
use crate::error::AppError;
use crate::history::{HistoryStore, InMemoryHistory, JsonLinesHistory};
use crate::recording::RecordingIngest;
use crate::registry::{ConnectionRegistry, Outbound};
use crate::relay::SignalRelay;
use crate::room::RoomDirectory;
use crate::storage::{BlobStore, FlatFileStorage};

/// Application state shared across all handlers
pub struct AppState<S> {
    /// Live connections
    pub registry: Arc<ConnectionRegistry>,
    /// Rooms and their actors
    pub rooms: RoomDirectory,
    /// Signal forwarding
    pub relay: SignalRelay,
    /// Meeting and recording history
    pub history: Arc<dyn HistoryStore>,
    /// Recording upload pipeline over the blob store
    pub recordings: RecordingIngest<S>,
    /// Settings
    pub settings: Arc<Settings>,
}

impl<S: BlobStore> AppState<S> {
    /// Create a new application state
    pub fn new(storage: S, history: Arc<dyn HistoryStore>, settings: Settings) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        Self {
            rooms: RoomDirectory::new(registry.clone(), history.clone()),
            relay: SignalRelay::new(registry.clone()),
            recordings: RecordingIngest::new(storage, history.clone()),
            registry,
            history,
            settings: Arc::new(settings),
        }
    }

    /// Register a new connection
    pub fn register_connection(&self, outbound: Outbound) -> ConnectionId {
        self.registry.register(outbound)
    }

    /// Remove every trace of a connection: room membership first, then
    /// the registry entry. Idempotent.
    pub async fn unregister_connection(&self, connection_id: ConnectionId) {
        if let Err(e) = self.rooms.leave(connection_id).await {
            tracing::warn!(connection = %connection_id, error = %e, "leave on disconnect failed");
        }
        self.registry.unregister(connection_id);
    }
}

impl AppState<FlatFileStorage> {
    /// Build state from settings: flat-file recordings plus the configured history
    pub async fn from_settings(settings: Settings) -> Result<Self, AppError> {
        let storage = FlatFileStorage::new(settings.recordings_dir())
            .map_err(|e| AppError::Storage(e.to_string()))?;
        let history: Arc<dyn HistoryStore> = match settings.history_backend {
            HistoryBackend::Memory => Arc::new(InMemoryHistory::new()),
            HistoryBackend::File => Arc::new(JsonLinesHistory::open(settings.history_dir()).await?),
        };
        Ok(Self::new(storage, history, settings))
    }
}
