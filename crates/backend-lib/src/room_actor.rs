// ============================
// crates/backend-lib/src/room_actor.rs
// ============================
//! One actor task per room; every membership change of a room runs here.
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use meetmesh_common::{
    ConnectionId, MeetingEvent, MeetingLogEntry, ParticipantInfo, RoomKey, ServerToClient,
};
use metrics::{counter, gauge};
use tokio::sync::{mpsc, oneshot};

use crate::error::AppError;
use crate::history::HistoryStore;
use crate::metrics::{ROOM_ACTIVE, ROOM_JOINED, ROOM_LEFT};
use crate::registry::ConnectionRegistry;

/// A member of a room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub connection_id: ConnectionId,
    pub display_name: String,
    pub joined_at: DateTime<Utc>,
}

impl Participant {
    pub fn info(&self) -> ParticipantInfo {
        ParticipantInfo {
            connection_id: self.connection_id,
            display_name: self.display_name.clone(),
        }
    }
}

/// Message sent *into* the actor
#[derive(Debug)]
pub enum RoomMsg {
    Join {
        connection_id: ConnectionId,
        display_name: String,
        resp_tx: oneshot::Sender<Result<Vec<Participant>, AppError>>,
    },
    Leave {
        connection_id: ConnectionId,
        resp_tx: oneshot::Sender<bool>,
    },
    Roster {
        resp_tx: oneshot::Sender<Vec<Participant>>,
    },
}

/// Handle the directory keeps: command channel plus actor generation
#[derive(Clone, Debug)]
pub struct RoomHandle {
    room_key: RoomKey,
    generation: u64,
    cmd_tx: mpsc::UnboundedSender<RoomMsg>,
}

impl RoomHandle {
    /// `RoomClosed` means the actor retired; look the room up again
    pub async fn join(
        &self,
        connection_id: ConnectionId,
        display_name: String,
    ) -> Result<Vec<Participant>, AppError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.cmd_tx
            .send(RoomMsg::Join {
                connection_id,
                display_name,
                resp_tx,
            })
            .map_err(|_| self.closed())?;
        resp_rx.await.map_err(|_| self.closed())?
    }

    pub async fn leave(&self, connection_id: ConnectionId) -> Result<bool, AppError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.cmd_tx
            .send(RoomMsg::Leave {
                connection_id,
                resp_tx,
            })
            .map_err(|_| self.closed())?;
        resp_rx.await.map_err(|_| self.closed())
    }

    pub async fn roster(&self) -> Result<Vec<Participant>, AppError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.cmd_tx
            .send(RoomMsg::Roster { resp_tx })
            .map_err(|_| self.closed())?;
        resp_rx.await.map_err(|_| self.closed())
    }

    fn closed(&self) -> AppError {
        AppError::RoomClosed(self.room_key.clone())
    }
}

/// Shared table of live rooms
pub type RoomTable = Arc<DashMap<RoomKey, RoomHandle>>;

pub struct RoomActor {
    room_key: RoomKey,
    generation: u64,
    participants: Vec<Participant>,
    registry: Arc<ConnectionRegistry>,
    history: Arc<dyn HistoryStore>,
    rooms: RoomTable,
}

impl RoomActor {
    pub fn new(
        room_key: RoomKey,
        generation: u64,
        registry: Arc<ConnectionRegistry>,
        history: Arc<dyn HistoryStore>,
        rooms: RoomTable,
    ) -> Self {
        RoomActor {
            room_key,
            generation,
            participants: Vec::new(),
            registry,
            history,
            rooms,
        }
    }

    fn position(&self, connection_id: ConnectionId) -> Option<usize> {
        self.participants
            .iter()
            .position(|p| p.connection_id == connection_id)
    }

    fn others(&self, connection_id: ConnectionId) -> Vec<Participant> {
        self.participants
            .iter()
            .filter(|p| p.connection_id != connection_id)
            .cloned()
            .collect()
    }

    async fn log(&self, participant: &Participant, event: MeetingEvent) {
        let entry = MeetingLogEntry {
            room_id: self.room_key.clone(),
            display_name: participant.display_name.clone(),
            connection_id: participant.connection_id,
            event,
            at: Utc::now(),
        };
        // membership changes go ahead without the audit entry
        if let Err(e) = self.history.append_meeting(entry).await {
            tracing::warn!(room = %self.room_key, error = %e, "meeting log append failed");
        }
    }

    /// Add a participant, confirm to it, then tell everyone else
    pub async fn handle_join(
        &mut self,
        connection_id: ConnectionId,
        display_name: String,
    ) -> Result<Vec<Participant>, AppError> {
        if self.position(connection_id).is_some() {
            let roster = self.others(connection_id);
            self.registry.send(
                connection_id,
                ServerToClient::RoomJoined {
                    room_key: self.room_key.clone(),
                    roster: roster.iter().map(Participant::info).collect(),
                },
            );
            return Ok(roster);
        }

        if !self.registry.bind(connection_id, &self.room_key, &display_name) {
            return Err(AppError::UnknownConnection(connection_id.to_string()));
        }

        let roster = self.participants.clone();
        let participant = Participant {
            connection_id,
            display_name,
            joined_at: Utc::now(),
        };
        self.participants.push(participant.clone());
        self.log(&participant, MeetingEvent::Joined).await;

        self.registry.send(
            connection_id,
            ServerToClient::RoomJoined {
                room_key: self.room_key.clone(),
                roster: roster.iter().map(Participant::info).collect(),
            },
        );
        let notice = ServerToClient::ParticipantJoined {
            room_key: self.room_key.clone(),
            participant: participant.info(),
        };
        for other in &roster {
            self.registry.send(other.connection_id, notice.clone());
        }

        counter!(ROOM_JOINED).increment(1);
        tracing::info!(
            room = %self.room_key,
            connection = %connection_id,
            members = self.participants.len(),
            "participant joined"
        );
        Ok(roster)
    }

    /// Remove a participant; false if it was not a member
    pub async fn handle_leave(&mut self, connection_id: ConnectionId) -> bool {
        let Some(index) = self.position(connection_id) else {
            return false;
        };
        let participant = self.participants.remove(index);
        self.registry.unbind(connection_id, &self.room_key);
        self.log(&participant, MeetingEvent::Left).await;

        self.registry.send(
            connection_id,
            ServerToClient::RoomLeft {
                room_key: self.room_key.clone(),
            },
        );
        let notice = ServerToClient::ParticipantLeft {
            room_key: self.room_key.clone(),
            connection_id,
        };
        for other in &self.participants {
            self.registry.send(other.connection_id, notice.clone());
        }

        counter!(ROOM_LEFT).increment(1);
        tracing::info!(
            room = %self.room_key,
            connection = %connection_id,
            members = self.participants.len(),
            "participant left"
        );
        true
    }

    pub fn roster(&self) -> Vec<Participant> {
        self.participants.clone()
    }

    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<RoomMsg>) {
        while let Some(msg) = rx.recv().await {
            match msg {
                RoomMsg::Join {
                    connection_id,
                    display_name,
                    resp_tx,
                } => {
                    let result = self.handle_join(connection_id, display_name).await;
                    let _ = resp_tx.send(result);
                },
                RoomMsg::Leave {
                    connection_id,
                    resp_tx,
                } => {
                    let left = self.handle_leave(connection_id).await;
                    let _ = resp_tx.send(left);
                },
                RoomMsg::Roster { resp_tx } => {
                    let _ = resp_tx.send(self.roster());
                },
            }

            if self.participants.is_empty() {
                break;
            }
        }

        // Retire: only remove our own entry, a newer actor may own the key.
        // Queued messages are dropped with `rx`; their senders see RoomClosed.
        let generation = self.generation;
        self.rooms
            .remove_if(&self.room_key, |_, handle| handle.generation == generation);
        gauge!(ROOM_ACTIVE).set(self.rooms.len() as f64);
        tracing::debug!(room = %self.room_key, generation, "room reclaimed");
    }
}

/// Spawn a new room actor and return its handle
pub fn spawn_room_actor(
    room_key: &str,
    generation: u64,
    registry: Arc<ConnectionRegistry>,
    history: Arc<dyn HistoryStore>,
    rooms: RoomTable,
) -> RoomHandle {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let actor = RoomActor::new(room_key.to_string(), generation, registry, history, rooms);

    tokio::spawn(async move {
        actor.run(cmd_rx).await;
    });

    RoomHandle {
        room_key: room_key.to_string(),
        generation,
        cmd_tx,
    }
}
