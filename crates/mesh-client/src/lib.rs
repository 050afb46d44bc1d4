// ============================
// crates/mesh-client/src/lib.rs
// ============================
//! Client side of the `MeetMesh` peer mesh.
//!
//! Every participant keeps one link per other participant. Links are
//! negotiated with offers, answers and candidates carried as opaque signal
//! payloads through the server. Exactly one side of each pair initiates:
//! the participant that joined later offers to everyone already present,
//! and waits for offers from anyone who joins after it.
//!
//! [`MeshSession`] holds the protocol state and is transport agnostic.
//! [`MeshClient`] drives a session over the server's WebSocket endpoint.

pub mod client;
pub mod engine;
pub mod error;
pub mod link;
pub mod session;

pub use client::MeshClient;
pub use engine::{EngineCall, EngineEvent, IceCandidate, LoopbackEngine, MediaEngine};
pub use error::{MeshError, Result};
pub use link::{LinkState, NegotiationStage, PeerLink, Role};
pub use session::{MeshConfig, MeshEvent, MeshSession};
