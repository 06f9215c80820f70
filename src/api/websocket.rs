use crate::dispatch::Dispatcher;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, warn};

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(dispatcher): State<Arc<Dispatcher>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, dispatcher))
}

/// One task per connection: the read half feeds frames to the dispatcher,
/// a writer task drains the connection's send-handle into the socket. The
/// dispatcher itself never awaits; all suspension happens here at the
/// transport edge.
async fn handle_socket(socket: WebSocket, dispatcher: Arc<Dispatcher>) {
    let (mut sender, mut receiver) = socket.split();
    let (mut conn, mut outbound) = dispatcher.connect();

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            let json = match serde_json::to_string(&frame) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize outbound frame");
                    continue;
                }
            };
            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                dispatcher.handle_text(&mut conn, &text);
            }
            Ok(Message::Close(_)) => {
                debug!(connection = %conn.connection_id, "websocket closed by peer");
                break;
            }
            Ok(_) => {} // binary/ping/pong frames are ignored
            Err(err) => {
                warn!(connection = %conn.connection_id, error = %err, "websocket error");
                break;
            }
        }
    }

    // Disconnect is the hard cancellation: the peer leaves every registry
    // before any further dispatch observes it.
    dispatcher.disconnect(&conn);
    drop(conn);
    writer.abort();
}
