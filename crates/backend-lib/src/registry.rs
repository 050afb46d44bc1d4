// ============================
// crates/backend-lib/src/registry.rs
// ============================
//! Registry of live signaling connections and their room binding.
use dashmap::{mapref::entry::Entry, DashMap};
use meetmesh_common::{ConnectionId, RoomKey, ServerToClient};
use tokio::sync::mpsc;

/// Outbound half of a connection; never blocks the sender
pub type Outbound = mpsc::UnboundedSender<ServerToClient>;

/// One registered connection
#[derive(Debug, Clone)]
pub struct ConnectionEntry {
    pub outbound: Outbound,
    pub room_key: Option<RoomKey>,
    pub display_name: Option<String>,
}

/// Room binding of a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub room_key: RoomKey,
    pub display_name: String,
}

/// Concurrently readable table of live connections.
///
/// Reads (relay lookups) only take a shard read lock; register and
/// unregister take the shard write lock.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionEntry>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection under a fresh identifier
    pub fn register(&self, outbound: Outbound) -> ConnectionId {
        loop {
            let id = ConnectionId::new_v4();
            if let Entry::Vacant(slot) = self.connections.entry(id) {
                slot.insert(ConnectionEntry {
                    outbound,
                    room_key: None,
                    display_name: None,
                });
                return id;
            }
        }
    }

    /// Drop a connection. Unknown ids are a no-op.
    ///
    /// Room cleanup is the caller's job, see `AppState::unregister_connection`.
    pub fn unregister(&self, id: ConnectionId) -> Option<ConnectionEntry> {
        self.connections.remove(&id).map(|(_, entry)| entry)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Bind a connection to a room; false if the connection is gone
    pub fn bind(&self, id: ConnectionId, room_key: &str, display_name: &str) -> bool {
        match self.connections.get_mut(&id) {
            Some(mut entry) => {
                entry.room_key = Some(room_key.to_string());
                entry.display_name = Some(display_name.to_string());
                true
            },
            None => false,
        }
    }

    /// Clear the binding only if it still points at `room_key`
    pub fn unbind(&self, id: ConnectionId, room_key: &str) -> bool {
        match self.connections.get_mut(&id) {
            Some(mut entry) if entry.room_key.as_deref() == Some(room_key) => {
                entry.room_key = None;
                true
            },
            _ => false,
        }
    }

    /// Current room binding of a connection
    pub fn binding(&self, id: ConnectionId) -> Option<Binding> {
        let entry = self.connections.get(&id)?;
        let room_key = entry.room_key.clone()?;
        Some(Binding {
            room_key,
            display_name: entry.display_name.clone().unwrap_or_default(),
        })
    }

    pub fn room_of(&self, id: ConnectionId) -> Option<RoomKey> {
        self.connections.get(&id).and_then(|entry| entry.room_key.clone())
    }

    /// Outbound channel of a live connection
    pub fn outbound(&self, id: ConnectionId) -> Option<Outbound> {
        self.connections.get(&id).map(|entry| entry.outbound.clone())
    }

    /// Best-effort delivery; false when the connection is gone or its writer stopped
    pub fn send(&self, id: ConnectionId, message: ServerToClient) -> bool {
        match self.outbound(id) {
            Some(outbound) => outbound.send(message).is_ok(),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (Outbound, mpsc::UnboundedReceiver<ServerToClient>) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn test_register_assigns_distinct_ids() {
        let registry = ConnectionRegistry::new();
        let ids: Vec<_> = (0..50).map(|_| registry.register(channel().0)).collect();

        let mut unique = ids.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), ids.len());
        assert_eq!(registry.len(), 50);
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let id = registry.register(channel().0);

        assert!(registry.unregister(id).is_some());
        assert!(registry.unregister(id).is_none());
        assert!(!registry.contains(id));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_bind_and_unbind() {
        let registry = ConnectionRegistry::new();
        let id = registry.register(channel().0);

        assert!(registry.binding(id).is_none());
        assert!(registry.bind(id, "demo", "Ada"));
        assert_eq!(
            registry.binding(id),
            Some(Binding { room_key: "demo".to_string(), display_name: "Ada".to_string() })
        );

        // stale room key leaves the binding alone
        assert!(!registry.unbind(id, "other"));
        assert_eq!(registry.room_of(id).as_deref(), Some("demo"));

        assert!(registry.unbind(id, "demo"));
        assert!(registry.room_of(id).is_none());
    }

    #[test]
    fn test_bind_unknown_connection() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.bind(ConnectionId::new_v4(), "demo", "Ada"));
    }

    #[test]
    fn test_send_reaches_outbound() {
        let registry = ConnectionRegistry::new();
        let (tx, mut rx) = channel();
        let id = registry.register(tx);

        assert!(registry.send(id, ServerToClient::Welcome { connection_id: id }));
        assert_eq!(rx.try_recv().unwrap(), ServerToClient::Welcome { connection_id: id });

        drop(rx);
        assert!(!registry.send(id, ServerToClient::Welcome { connection_id: id }));
        assert!(!registry.send(ConnectionId::new_v4(), ServerToClient::Welcome { connection_id: id }));
    }
}
