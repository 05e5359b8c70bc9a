use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::Message;
use axum::extract::ws::WebSocket;
use axum::extract::ws::WebSocketUpgrade;
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use nospace_core::ConnectionController;
use nospace_core::create_backend;
use nospace_protocol::ClientMessage;
use nospace_protocol::ServerMessage;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

use crate::AppState;

pub(crate) async fn ws_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

/// Drives one connection: a writer task drains the controller's outbound
/// queue while this task feeds inbound frames to the controller. When the
/// peer goes away the bound session is killed.
async fn serve_socket(socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4();
    info!(%connection_id, "🔌 [ws] connection opened");

    let (mut sink, mut stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ServerMessage>();

    let backend = create_backend(Arc::clone(&state.config));
    let controller = ConnectionController::new(backend, state.registry.clone(), outbound_tx);

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(err) => {
                    warn!(error = %err, "[ws] failed to serialize frame");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                debug!(%connection_id, "[ws] send failed, peer gone");
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(text.as_str()) {
                Ok(message) => controller.handle_message(message).await,
                Err(err) => {
                    warn!(%connection_id, error = %err, "[ws] ignoring malformed frame");
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                warn!(%connection_id, error = %err, "[ws] receive failed");
                break;
            }
        }
    }

    controller.handle_disconnect();
    writer.abort();
    info!(%connection_id, "[ws] connection closed");
}
