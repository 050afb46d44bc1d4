// ============================
// crates/backend-lib/src/relay.rs
// ============================
//! Best-effort forwarding of negotiation payloads between room members.
use std::sync::Arc;

use meetmesh_common::{ConnectionId, ServerToClient, SignalPayload};
use metrics::counter;

use crate::metrics::{SIGNAL_DROPPED, SIGNAL_RELAYED};
use crate::registry::ConnectionRegistry;

/// Addressed negotiation step
#[derive(Debug, Clone)]
pub struct SignalEnvelope {
    pub to: ConnectionId,
    pub from: ConnectionId,
    pub payload: SignalPayload,
}

/// What happened to an envelope. Never reported back to the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    Delivered,
    /// Destination is not registered (or its writer already stopped)
    UnknownDestination,
    /// Sender is not in any room
    SourceNotInRoom,
    /// Destination is in another room, or in none
    RoomMismatch,
}

impl RelayOutcome {
    fn label(self) -> &'static str {
        match self {
            RelayOutcome::Delivered => "delivered",
            RelayOutcome::UnknownDestination => "unknown_destination",
            RelayOutcome::SourceNotInRoom => "source_not_in_room",
            RelayOutcome::RoomMismatch => "room_mismatch",
        }
    }
}

/// Routes envelopes by their `to`/`from` fields only
#[derive(Clone)]
pub struct SignalRelay {
    registry: Arc<ConnectionRegistry>,
}

impl SignalRelay {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub fn relay(&self, envelope: SignalEnvelope) -> RelayOutcome {
        let outcome = self.route(envelope);
        match outcome {
            RelayOutcome::Delivered => counter!(SIGNAL_RELAYED).increment(1),
            dropped => {
                counter!(SIGNAL_DROPPED, "reason" => dropped.label()).increment(1);
                tracing::debug!(reason = dropped.label(), "signal dropped");
            },
        }
        outcome
    }

    fn route(&self, envelope: SignalEnvelope) -> RelayOutcome {
        let Some(source_room) = self.registry.room_of(envelope.from) else {
            return RelayOutcome::SourceNotInRoom;
        };

        // copy what we need out of the map before sending
        let destination = self
            .registry
            .binding(envelope.to)
            .map(|binding| binding.room_key);
        let Some(outbound) = self.registry.outbound(envelope.to) else {
            return RelayOutcome::UnknownDestination;
        };
        if destination.as_deref() != Some(source_room.as_str()) {
            return RelayOutcome::RoomMismatch;
        }

        let message = ServerToClient::Signal {
            to: envelope.to,
            from: envelope.from,
            payload: envelope.payload,
        };
        if outbound.send(message).is_err() {
            return RelayOutcome::UnknownDestination;
        }
        RelayOutcome::Delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn connect(
        registry: &ConnectionRegistry,
        room: Option<&str>,
    ) -> (ConnectionId, mpsc::UnboundedReceiver<ServerToClient>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = registry.register(tx);
        if let Some(room) = room {
            registry.bind(id, room, "peer");
        }
        (id, rx)
    }

    fn envelope(from: ConnectionId, to: ConnectionId) -> SignalEnvelope {
        SignalEnvelope {
            to,
            from,
            payload: SignalPayload(json!({"type": "offer", "sdp": "v=0\r\n", "nested": {"k": [1, 2]}})),
        }
    }

    #[test]
    fn test_delivers_verbatim_within_room() {
        let registry = Arc::new(ConnectionRegistry::new());
        let relay = SignalRelay::new(registry.clone());
        let (a, _a_rx) = connect(&registry, Some("demo"));
        let (b, mut b_rx) = connect(&registry, Some("demo"));

        let sent = envelope(a, b);
        assert_eq!(relay.relay(sent.clone()), RelayOutcome::Delivered);
        assert_eq!(
            b_rx.try_recv().unwrap(),
            ServerToClient::Signal { to: b, from: a, payload: sent.payload }
        );
    }

    #[test]
    fn test_drops_across_rooms() {
        let registry = Arc::new(ConnectionRegistry::new());
        let relay = SignalRelay::new(registry.clone());
        let (a, mut a_rx) = connect(&registry, Some("one"));
        let (b, mut b_rx) = connect(&registry, Some("two"));
        let (c, mut c_rx) = connect(&registry, None);

        assert_eq!(relay.relay(envelope(a, b)), RelayOutcome::RoomMismatch);
        assert_eq!(relay.relay(envelope(a, c)), RelayOutcome::RoomMismatch);
        assert_eq!(relay.relay(envelope(c, a)), RelayOutcome::SourceNotInRoom);

        // nobody received anything
        assert!(a_rx.try_recv().is_err());
        assert!(b_rx.try_recv().is_err());
        assert!(c_rx.try_recv().is_err());
    }

    #[test]
    fn test_drops_unknown_destination() {
        let registry = Arc::new(ConnectionRegistry::new());
        let relay = SignalRelay::new(registry.clone());
        let (a, mut a_rx) = connect(&registry, Some("demo"));
        let (b, b_rx) = connect(&registry, Some("demo"));

        assert_eq!(relay.relay(envelope(a, ConnectionId::new_v4())), RelayOutcome::UnknownDestination);

        registry.unregister(b);
        drop(b_rx);
        assert_eq!(relay.relay(envelope(a, b)), RelayOutcome::UnknownDestination);
        assert!(a_rx.try_recv().is_err());
    }
}
