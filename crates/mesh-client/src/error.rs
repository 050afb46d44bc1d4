// ============================
// crates/mesh-client/src/error.rs
// ============================
//! Error type of the mesh client.
use meetmesh_common::ConnectionId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MeshError {
    #[error("Media engine error: {0}")]
    Engine(String),

    #[error("WebSocket error: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Signaling channel closed")]
    ChannelClosed,

    #[error("No link to peer {0}")]
    UnknownPeer(ConnectionId),

    #[error("Server rejected request ({code}): {message}")]
    Rejected { code: String, message: String },
}

pub type Result<T> = std::result::Result<T, MeshError>;
