// ============================
// meetmesh-backend-lib/src/ws_router.rs
// ============================
//! HTTP router and WebSocket connection handling.
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        DefaultBodyLimit, State,
    },
    response::IntoResponse,
    routing::{delete, get, post},
    Router,
};
use futures_util::{SinkExt, StreamExt};
use meetmesh_common::{ClientToServer, ServerToClient};
use metrics::{counter, gauge};
use tokio::sync::mpsc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::handlers::{history, recordings};
use crate::metrics::{WS_ACTIVE, WS_CONNECTION, WS_DISCONNECTION};
use crate::storage::BlobStore;
use crate::websocket::{error_frame, WebSocketHandler};
use crate::AppState;

/// Time the writer gets to flush queued frames after the reader stops
const WRITER_DRAIN: Duration = Duration::from_secs(1);

/// Create the application router
pub fn create_router<S: BlobStore + 'static>(state: Arc<AppState<S>>) -> Router {
    let body_limit = state.settings.max_upload_bytes;
    Router::new()
        .route("/ws", get(ws_handler::<S>))
        .route("/health", get(health))
        .route(
            "/recordings",
            get(recordings::list_recordings::<S>).post(recordings::upload_recording::<S>),
        )
        .route(
            "/recordings/{key}",
            get(recordings::fetch_recording::<S>).delete(recordings::delete_recording::<S>),
        )
        .route("/upload-recording", post(recordings::upload_recording::<S>))
        .route("/meetings", get(history::list_meetings::<S>))
        .route("/meetings/{index}", delete(history::delete_meeting::<S>))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "Healthy"
}

/// Handler for WebSocket connections
pub async fn ws_handler<S: BlobStore + 'static>(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState<S>>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection<S: BlobStore + 'static>(socket: WebSocket, state: Arc<AppState<S>>) {
    counter!(WS_CONNECTION).increment(1);
    gauge!(WS_ACTIVE).increment(1.0);

    let (mut sink, mut stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ServerToClient>();

    let connection_id = state.register_connection(outbound_tx.clone());
    let handler = WebSocketHandler::new(state.clone(), connection_id);
    // first frame on every socket
    let _ = outbound_tx.send(ServerToClient::Welcome { connection_id });
    tracing::info!(connection = %connection_id, "connection opened");

    // Writer: outbound frames plus periodic pings
    let heartbeat = state.settings.heartbeat();
    let mut writer = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(heartbeat);
        ticker.tick().await;
        loop {
            tokio::select! {
                frame = outbound_rx.recv() => {
                    let Some(frame) = frame else { break };
                    let json = match serde_json::to_string(&frame) {
                        Ok(json) => json,
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to serialize frame");
                            continue;
                        },
                    };
                    if sink.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                },
                _ = ticker.tick() => {
                    if sink.send(Message::Ping(Default::default())).await.is_err() {
                        break;
                    }
                },
            }
        }
        let _ = sink.close().await;
    });

    // Reader: any inbound frame, pongs included, resets the idle timer
    let idle_timeout = state.settings.idle_timeout();
    loop {
        let frame = match tokio::time::timeout(idle_timeout, stream.next()).await {
            Err(_) => {
                tracing::info!(connection = %connection_id, "idle timeout");
                break;
            },
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                tracing::debug!(connection = %connection_id, error = %e, "socket error");
                break;
            },
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Message::Text(text) => {
                let reply = match serde_json::from_str::<ClientToServer>(text.as_str()) {
                    Ok(msg) => match handler.handle_message(msg).await {
                        Ok(reply) => reply,
                        Err(e) => {
                            tracing::warn!(connection = %connection_id, error = %e, "message failed");
                            Some(error_frame(&e))
                        },
                    },
                    Err(e) => Some(ServerToClient::MalformedMessage {
                        err_msg: e.to_string(),
                    }),
                };
                if let Some(reply) = reply {
                    if outbound_tx.send(reply).is_err() {
                        break;
                    }
                }
            },
            Message::Close(_) => break,
            _ => {},
        }
    }

    // Cleanup: leave the room, then drop the registry entry
    state.unregister_connection(connection_id).await;
    drop(outbound_tx);
    if tokio::time::timeout(WRITER_DRAIN, &mut writer).await.is_err() {
        writer.abort();
    }

    tracing::info!(connection = %connection_id, "connection closed");
    counter!(WS_DISCONNECTION).increment(1);
    gauge!(WS_ACTIVE).decrement(1.0);
}
