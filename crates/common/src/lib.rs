// ================
// common/src/lib.rs
// ================
//! Common types and structures
//! used for communication between `MeetMesh` clients and the coordination server.
//! This module defines the WebSocket protocol messages and the history records
//! exposed over HTTP.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Room keys are caller-supplied opaque strings
pub type RoomKey = String;

/// Identifier of one live signaling connection
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Fresh random identifier
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ConnectionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Opaque negotiation payload.
///
/// The server routes it by envelope fields only and never looks inside.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(transparent)]
pub struct SignalPayload(pub serde_json::Value);

/// Public view of a room member
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ParticipantInfo {
    pub connection_id: ConnectionId,
    pub display_name: String,
}

/// Messages sent from client to server
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "msgType")]
pub enum ClientToServer {
    /// Join (or implicitly create) a room
    /// # Fields
    /// * `room_key` - Key of the room to join
    /// * `display_name` - Name shown to the other participants
    JoinRoom {
        room_key: RoomKey,
        display_name: String,
    },
    /// Leave the current room, if any
    LeaveRoom,
    /// Relay a negotiation payload to another connection in the same room
    /// # Fields
    /// * `to` - Destination connection
    /// * `from` - Sender; filled in by the server when omitted
    /// * `payload` - Opaque negotiation step
    Signal {
        to: ConnectionId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<ConnectionId>,
        payload: SignalPayload,
    },
}

/// Messages sent from server to client
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "msgType")]
pub enum ServerToClient {
    /// First frame on every connection
    Welcome {
        /// Identifier assigned to this connection
        connection_id: ConnectionId,
    },
    /// Confirmation of a join
    RoomJoined {
        room_key: RoomKey,
        /// Participants already present, in join order
        roster: Vec<ParticipantInfo>,
    },
    /// Another participant joined the room
    ParticipantJoined {
        room_key: RoomKey,
        participant: ParticipantInfo,
    },
    /// Another participant left the room
    ParticipantLeft {
        room_key: RoomKey,
        connection_id: ConnectionId,
    },
    /// Confirmation of a leave
    RoomLeft { room_key: RoomKey },
    /// Relayed negotiation payload
    Signal {
        to: ConnectionId,
        from: ConnectionId,
        payload: SignalPayload,
    },
    /// Error response for frames that could not be parsed
    MalformedMessage {
        /// Error description
        err_msg: String,
    },
    /// Error response for well-formed but rejected requests
    Error { code: String, message: String },
}

/// Kind of a meeting log entry
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MeetingEvent {
    Joined,
    Left,
}

/// One row of the meeting audit trail
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MeetingLogEntry {
    pub room_id: RoomKey,
    pub display_name: String,
    pub connection_id: ConnectionId,
    pub event: MeetingEvent,
    pub at: DateTime<Utc>,
}

/// Metadata of an archived recording
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecordingMetadata {
    pub file_identifier: String,
    pub storage_path: String,
    pub room_id: RoomKey,
    pub uploader_name: String,
    pub uploaded_at: DateTime<Utc>,
    pub size: u64,
    pub content_type: String,
}

/// Negotiation steps exchanged by mesh clients inside [`SignalPayload`].
///
/// Only clients interpret these; the server relays them as opaque JSON.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NegotiationMessage {
    Offer { sdp: String, attempt: u32 },
    Answer { sdp: String, attempt: u32 },
    Candidate {
        candidate: String,
        #[serde(default)]
        sdp_mid: Option<String>,
        #[serde(default)]
        sdp_m_line_index: Option<u16>,
    },
}

impl NegotiationMessage {
    pub fn into_payload(self) -> SignalPayload {
        // serializing a tagged enum of strings and integers cannot fail
        SignalPayload(serde_json::to_value(self).unwrap_or(serde_json::Value::Null))
    }

    pub fn from_payload(payload: &SignalPayload) -> Result<Self, serde_json::Error> {
        serde_json::from_value(payload.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_message_wire_format() {
        let to = ConnectionId::new_v4();
        let msg = ClientToServer::Signal {
            to,
            from: None,
            payload: SignalPayload(json!({"type": "offer", "sdp": "v=0"})),
        };

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["msgType"], "Signal");
        assert_eq!(value["to"], to.to_string());
        assert!(value.get("from").is_none());
        assert_eq!(value["payload"]["sdp"], "v=0");
    }

    #[test]
    fn test_leave_room_parses_without_fields() {
        let msg: ClientToServer = serde_json::from_str(r#"{"msgType":"LeaveRoom"}"#).unwrap();
        assert!(matches!(msg, ClientToServer::LeaveRoom));
    }

    #[test]
    fn test_join_room_requires_display_name() {
        let err = serde_json::from_str::<ClientToServer>(r#"{"msgType":"JoinRoom","room_key":"demo"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_payload_is_kept_verbatim() {
        let raw = json!({"candidate": {"candidate": "a=1", "sdpMid": "0"}, "extra": [1, 2, 3]});
        let from = ConnectionId::new_v4();
        let to = ConnectionId::new_v4();
        let msg = ServerToClient::Signal { to, from, payload: SignalPayload(raw.clone()) };

        let text = serde_json::to_string(&msg).unwrap();
        let back: ServerToClient = serde_json::from_str(&text).unwrap();
        match back {
            ServerToClient::Signal { payload, .. } => assert_eq!(payload.0, raw),
            other => panic!("Expected Signal, got {other:?}"),
        }
    }

    #[test]
    fn test_negotiation_message_payload() {
        let offer = NegotiationMessage::Offer { sdp: "v=0".to_string(), attempt: 2 };
        let payload = offer.clone().into_payload();
        assert_eq!(payload.0["kind"], "offer");
        assert_eq!(NegotiationMessage::from_payload(&payload).unwrap(), offer);

        let foreign = SignalPayload(json!({"type": "unknown"}));
        assert!(NegotiationMessage::from_payload(&foreign).is_err());
    }

    #[test]
    fn test_connection_id_round_trips_through_str() {
        let id = ConnectionId::new_v4();
        let parsed: ConnectionId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<ConnectionId>().is_err());
    }
}
