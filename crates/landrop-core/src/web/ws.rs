//! WebSocket transport for the signaling channel.
//!
//! Each socket maps to one hub connection: a pump task drains the hub's
//! outbound queue into the socket while this task feeds inbound frames to
//! the router. When either side closes, the connection and its device
//! binding are dropped immediately.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};

use crate::signaling::SignalMessage;

use super::state::SharedState;

/// GET /ws - upgrade to a signaling connection.
pub async fn ws_handler(State(state): State<SharedState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: SharedState) {
    // Greet the client first so it knows the channel is live before it
    // sends REGISTER.
    let greeting = SignalMessage::Ready {
        role: "receiver".to_string(),
    };
    if let Ok(text) = serde_json::to_string(&greeting) {
        if socket.send(Message::Text(text.into())).await.is_err() {
            return;
        }
    }

    let (connection, mut outbound) = state.hub.connect();
    let (mut sink, mut stream) = socket.split();

    let pump = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let Ok(text) = serde_json::to_string(&message) else {
                continue;
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(frame)) = stream.next().await {
        match frame {
            Message::Text(text) => match serde_json::from_str::<SignalMessage>(&text) {
                Ok(message) => state.hub.handle_message(connection, message),
                Err(e) => {
                    tracing::debug!(connection = %connection, "Unparseable signaling frame: {e}");
                    state.hub.send_error(connection, "Invalid message format");
                }
            },
            Message::Close(_) => break,
            // Pings are answered by axum; binary frames have no meaning here.
            _ => {}
        }
    }

    state.hub.disconnect(connection);
    pump.abort();
    tracing::debug!(connection = %connection, "Signaling connection closed");
}
