use crate::server::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use qtrade_core::{BotEvent, Shutdown};
use tokio::sync::broadcast;

pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let events = state.events.subscribe();
    let shutdown = state.shutdown.clone();
    ws.on_upgrade(move |socket| websocket_connection(socket, events, shutdown))
}

/// Forwards every event as a JSON text frame until the client leaves.
async fn websocket_connection(
    mut socket: WebSocket,
    mut events: broadcast::Receiver<BotEvent>,
    mut shutdown: Shutdown,
) {
    tracing::info!("WebSocket client connected");

    loop {
        tokio::select! {
            event = events.recv() => {
                let event = match event {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "WebSocket client lagging, events dropped");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                let json = match serde_json::to_string(&event) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::error!(kind = event.kind(), error = %e, "failed to encode event");
                        continue;
                    }
                };
                if socket.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                    _ => {}
                }
            }
            () = shutdown.wait() => {
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
        }
    }

    tracing::info!("WebSocket connection closed");
}
