// ============================
// crates/backend-lib/src/room.rs
// ============================
//! Room directory: routes membership requests to per-room actors.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use meetmesh_common::ConnectionId;
use metrics::gauge;

use crate::error::AppError;
use crate::history::HistoryStore;
use crate::metrics::ROOM_ACTIVE;
use crate::registry::ConnectionRegistry;
use crate::room_actor::{spawn_room_actor, Participant, RoomHandle, RoomTable};

/// A stale handle is retried at most this many times
const MAX_STALE_RETRIES: usize = 8;

/// Directory of all live rooms
pub struct RoomDirectory {
    rooms: RoomTable,
    registry: Arc<ConnectionRegistry>,
    history: Arc<dyn HistoryStore>,
    next_generation: AtomicU64,
}

impl RoomDirectory {
    pub fn new(registry: Arc<ConnectionRegistry>, history: Arc<dyn HistoryStore>) -> Self {
        RoomDirectory {
            rooms: Arc::new(DashMap::new()),
            registry,
            history,
            next_generation: AtomicU64::new(1),
        }
    }

    /// Existing handle, or a freshly spawned actor for an unknown key
    fn get_or_spawn(&self, room_key: &str) -> RoomHandle {
        if let Some(handle) = self.rooms.get(room_key) {
            return handle.clone();
        }

        let handle = self
            .rooms
            .entry(room_key.to_string())
            .or_insert_with(|| {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(room = %room_key, generation, "room created");
                spawn_room_actor(
                    room_key,
                    generation,
                    self.registry.clone(),
                    self.history.clone(),
                    self.rooms.clone(),
                )
            })
            .clone();
        gauge!(ROOM_ACTIVE).set(self.rooms.len() as f64);
        handle
    }

    /// Join `room_key`, leaving any other room first.
    ///
    /// Returns the participants that were present before the join, in join
    /// order. The same roster is pushed to the connection as `RoomJoined`.
    #[tracing::instrument(skip(self, display_name))]
    pub async fn join(
        &self,
        room_key: &str,
        connection_id: ConnectionId,
        display_name: &str,
    ) -> Result<Vec<Participant>, AppError> {
        if let Some(current) = self.registry.room_of(connection_id) {
            if current != room_key {
                self.leave(connection_id).await?;
            }
        }

        for _ in 0..MAX_STALE_RETRIES {
            let handle = self.get_or_spawn(room_key);
            match handle.join(connection_id, display_name.to_string()).await {
                Err(AppError::RoomClosed(_)) => {
                    tracing::debug!(room = %room_key, "retrying join on retired room");
                    continue;
                },
                other => return other,
            }
        }

        Err(AppError::Internal(format!(
            "room {room_key} kept retiring during join"
        )))
    }

    /// Leave whatever room the connection is in. Safe to call repeatedly.
    ///
    /// Returns true if a membership was ended by this call.
    #[tracing::instrument(skip(self))]
    pub async fn leave(&self, connection_id: ConnectionId) -> Result<bool, AppError> {
        let Some(room_key) = self.registry.room_of(connection_id) else {
            return Ok(false);
        };

        let handle = self.rooms.get(&room_key).map(|entry| entry.value().clone());
        let left = match handle {
            Some(handle) => match handle.leave(connection_id).await {
                Ok(left) => left,
                Err(AppError::RoomClosed(_)) => false,
                Err(e) => return Err(e),
            },
            None => false,
        };

        if !left {
            // binding without a live membership; just clear it
            self.registry.unbind(connection_id, &room_key);
        }
        Ok(left)
    }

    /// Snapshot of a room's participants in join order; empty for unknown rooms
    pub async fn roster(&self, room_key: &str) -> Vec<Participant> {
        let handle = self.rooms.get(room_key).map(|entry| entry.value().clone());
        match handle {
            Some(handle) => handle.roster().await.unwrap_or_default(),
            None => Vec::new(),
        }
    }

    /// Number of live rooms
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
