// ============================
// crates/mesh-client/src/client.rs
// ============================
//! Drives a [`MeshSession`] over the server's WebSocket endpoint.
use futures_util::{SinkExt, StreamExt};
use meetmesh_common::{ClientToServer, ServerToClient};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::engine::{EngineEvent, MediaEngine};
use crate::error::Result;
use crate::session::{MeshConfig, MeshEvent, MeshSession};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// A participant connected to the signaling server
pub struct MeshClient<E> {
    ws: WsStream,
    session: MeshSession<E>,
    outbound_rx: mpsc::UnboundedReceiver<ClientToServer>,
    engine_events: mpsc::UnboundedReceiver<EngineEvent>,
    tick: std::time::Duration,
}

impl<E: MediaEngine> MeshClient<E> {
    /// Open the WebSocket at `url` (e.g. `ws://127.0.0.1:5000/ws`).
    ///
    /// Returns the client and the stream of [`MeshEvent`]s it will produce.
    pub async fn connect(
        url: &str,
        engine: E,
        engine_events: mpsc::UnboundedReceiver<EngineEvent>,
        config: MeshConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<MeshEvent>)> {
        let (ws, _) = connect_async(url).await?;
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let tick = config.tick;
        let client = Self {
            ws,
            session: MeshSession::new(engine, outbound_tx, events_tx, config),
            outbound_rx,
            engine_events,
            tick,
        };
        Ok((client, events_rx))
    }

    /// Join `room_key` once the server has greeted us, then run the mesh
    /// until the server goes away or `shutdown` fires. On shutdown the room
    /// is left and every link is closed.
    pub async fn run(
        self,
        room_key: &str,
        display_name: &str,
        mut shutdown: oneshot::Receiver<()>,
    ) -> Result<()> {
        let Self {
            ws,
            mut session,
            mut outbound_rx,
            mut engine_events,
            tick,
        } = self;
        let (mut sink, mut stream) = ws.split();
        let mut ticker = tokio::time::interval(tick);
        let mut joined = false;

        loop {
            tokio::select! {
                frame = stream.next() => {
                    let text = match frame {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            session.close_all().await;
                            return Err(e.into());
                        },
                    };
                    let message = match serde_json::from_str::<ServerToClient>(text.as_str()) {
                        Ok(message) => message,
                        Err(e) => {
                            tracing::warn!(error = %e, "unreadable server frame");
                            continue;
                        },
                    };
                    let welcome = matches!(message, ServerToClient::Welcome { .. });
                    if let Err(e) = session.handle_server_message(message).await {
                        tracing::warn!(error = %e, "server rejected a request");
                    }
                    if welcome && !joined {
                        session.join(room_key, display_name)?;
                        joined = true;
                    }
                },
                Some(message) = outbound_rx.recv() => {
                    let json = serde_json::to_string(&message)?;
                    sink.send(Message::Text(json.into())).await?;
                },
                Some(event) = engine_events.recv() => {
                    if let Err(e) = session.handle_engine_event(event).await {
                        tracing::debug!(error = %e, "engine event dropped");
                    }
                },
                _ = ticker.tick() => {
                    session.expire_stalled(Instant::now()).await;
                },
                _ = &mut shutdown => {
                    session.leave().await?;
                    while let Ok(message) = outbound_rx.try_recv() {
                        let json = serde_json::to_string(&message)?;
                        sink.send(Message::Text(json.into())).await?;
                    }
                    let _ = sink.close().await;
                    return Ok(());
                },
            }
        }

        session.close_all().await;
        Ok(())
    }
}
