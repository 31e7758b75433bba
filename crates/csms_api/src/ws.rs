//! WebSocket endpoint stations connect to.
//!
//! Each socket is served by its own task which handles frames strictly in
//! arrival order. Replies and server-initiated calls are funnelled through one
//! channel into a writer task so they never interleave mid-frame.

use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use csms_core::ConnectionId;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::app_state::AppState;

pub const OCPP_SUBPROTOCOL: &str = "ocpp1.6";

/// Upgrade `/ocpp/{charge_point_id}` into a station connection
pub async fn ocpp_upgrade(
    ws: WebSocketUpgrade,
    Path(charge_point_id): Path<String>,
    State(app_state): State<AppState>,
) -> Response {
    ws.protocols([OCPP_SUBPROTOCOL])
        .on_upgrade(move |socket| handle_socket(socket, app_state, charge_point_id))
}

/// Detaches a connection when its socket task ends, also when the task unwinds.
struct ConnectionGuard {
    app_state: AppState,
    connection_id: ConnectionId,
    charge_point_id: String,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.app_state.disconnect(self.connection_id);
        tracing::info!(
            connection_id = %self.connection_id,
            "Station {} disconnected",
            self.charge_point_id
        );
    }
}

async fn handle_socket(socket: WebSocket, app_state: AppState, charge_point_id: String) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let connection_id = app_state.connect(&charge_point_id, tx.clone());
    tracing::info!(%connection_id, "Station {} connected", charge_point_id);
    let guard = ConnectionGuard {
        app_state: app_state.clone(),
        connection_id,
        charge_point_id,
    };

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                if let Some(reply) = app_state.handle_frame(connection_id, text.as_str()) {
                    if tx.send(reply).is_err() {
                        break;
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                tracing::warn!(%connection_id, "Ignoring binary frame");
            }
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_) | Message::Pong(_)) => {}
            Err(error) => {
                tracing::warn!(%connection_id, "Socket error: {}", error);
                break;
            }
        }
    }

    drop(guard);
    drop(tx);
    let _ = writer.await;
}
