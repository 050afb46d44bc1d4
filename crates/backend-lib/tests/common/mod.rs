//! Shared helpers for the integration suites.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use meetmesh_backend_lib::{
    config::{HistoryBackend, Settings},
    storage::FlatFileStorage,
    ws_router::create_router,
    AppState,
};
use meetmesh_common::{ClientToServer, ConnectionId, ServerToClient};
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Settings rooted in `temp_dir`
pub fn test_settings(temp_dir: &TempDir) -> Settings {
    Settings {
        data_dir: temp_dir.path().to_path_buf(),
        history_backend: HistoryBackend::File,
        ..Settings::default()
    }
}

/// Serve the full router on an ephemeral port
pub async fn setup_server() -> (SocketAddr, Arc<AppState<FlatFileStorage>>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let state = Arc::new(
        AppState::from_settings(test_settings(&temp_dir))
            .await
            .expect("Failed to create AppState for test"),
    );
    let app = create_router(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state, temp_dir)
}

/// Connect and consume the `Welcome` frame
pub async fn connect(addr: SocketAddr) -> (Client, ConnectionId) {
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("Failed to connect");
    match recv(&mut ws).await {
        ServerToClient::Welcome { connection_id } => (ws, connection_id),
        other => panic!("expected Welcome, got {other:?}"),
    }
}

pub async fn send(ws: &mut Client, message: &ClientToServer) {
    let json = serde_json::to_string(message).unwrap();
    ws.send(Message::Text(json.into())).await.unwrap();
}

pub async fn send_raw(ws: &mut Client, text: &str) {
    ws.send(Message::Text(text.to_string().into())).await.unwrap();
}

pub async fn join(ws: &mut Client, room_key: &str, display_name: &str) {
    send(
        ws,
        &ClientToServer::JoinRoom {
            room_key: room_key.to_string(),
            display_name: display_name.to_string(),
        },
    )
    .await;
}

async fn next_frame(ws: &mut Client, wait: Duration) -> Option<ServerToClient> {
    loop {
        match tokio::time::timeout(wait, ws.next()).await {
            Err(_) => return None,
            Ok(Some(Ok(Message::Text(text)))) => {
                return Some(serde_json::from_str(text.as_str()).unwrap());
            },
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => return None,
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(e))) => panic!("socket error: {e:?}"),
        }
    }
}

/// Next server frame, failing the test after five seconds
pub async fn recv(ws: &mut Client) -> ServerToClient {
    next_frame(ws, Duration::from_secs(5))
        .await
        .expect("timed out waiting for a frame")
}

/// Assert nothing arrives for a short while
pub async fn assert_silent(ws: &mut Client) {
    if let Some(frame) = next_frame(ws, Duration::from_millis(200)).await {
        panic!("unexpected frame {frame:?}");
    }
}

/// Wait until `check` holds, polling every 10 ms for up to five seconds
pub async fn eventually<F: FnMut() -> bool>(mut check: F) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
