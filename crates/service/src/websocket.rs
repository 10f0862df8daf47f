//! WebSocket transport: one socket per client, any request path.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, CloseFrame, Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::client::{Outbound, NORMAL_CLOSURE};
use crate::server::Server;

const INVALID_URL_REASON: &str = "Invalid socket url.";

/// Upgrade handler mounted as the router fallback, so every path that is not
/// a JSON endpoint is a socket endpoint.
pub async fn ws_handler(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    State(server): State<Arc<Server>>,
    uri: Uri,
) -> Response {
    let Ok(ws) = ws else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let url = uri
        .path_and_query()
        .map(|target| target.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string());
    ws.on_upgrade(move |socket| handle_socket(socket, server, url))
}

async fn handle_socket(socket: WebSocket, server: Arc<Server>, url: String) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();

    let client = match server.create_client(&url, outbound_tx) {
        Ok(client) => client,
        Err(reason) => {
            warn!(
                component = "websocket",
                event = "ws.connection.rejected",
                url = %url,
                reason,
                "Rejecting socket with no valid target"
            );
            let _ = ws_tx
                .send(Message::Close(Some(CloseFrame {
                    code: NORMAL_CLOSURE,
                    reason: INVALID_URL_REASON.into(),
                })))
                .await;
            return;
        }
    };
    let conn_id = client.id();
    info!(
        component = "websocket",
        event = "ws.connection.opened",
        connection_id = conn_id,
        kind = client.kind().as_str(),
        url = %url,
        "WebSocket connection opened"
    );

    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let (message, closing) = match frame {
                Outbound::Text(text) => (Message::Text(text.into()), false),
                Outbound::Close { code, reason } => (
                    Message::Close(Some(CloseFrame {
                        code,
                        reason: reason.into(),
                    })),
                    true,
                ),
            };
            if ws_tx.send(message).await.is_err() {
                debug!(
                    component = "websocket",
                    event = "ws.send.disconnected",
                    connection_id = conn_id,
                    "WebSocket send failed, client disconnected"
                );
                break;
            }
            if closing {
                break;
            }
        }
    });

    server.register(Arc::clone(&client));

    loop {
        let next = tokio::select! {
            next = ws_rx.next() => next,
            _ = &mut send_task => break,
        };
        let Some(result) = next else {
            break;
        };
        match result {
            Ok(Message::Text(text)) => client.handle_text(&server, text.as_str()),
            Ok(Message::Binary(data)) => {
                client.handle_text(&server, &String::from_utf8_lossy(&data));
            }
            Ok(Message::Close(frame)) => {
                info!(
                    component = "websocket",
                    event = "ws.connection.close_frame",
                    connection_id = conn_id,
                    code = frame.as_ref().map(|f| f.code),
                    "Client sent close frame"
                );
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!(
                    component = "websocket",
                    event = "ws.connection.error",
                    connection_id = conn_id,
                    error = %e,
                    "WebSocket error"
                );
                break;
            }
        }
    }

    server.unregister(&client);
    info!(
        component = "websocket",
        event = "ws.connection.closed",
        connection_id = conn_id,
        "WebSocket connection closed"
    );
    send_task.abort();
}
