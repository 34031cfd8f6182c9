//! WebSocket control connections

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::protocol::generate_client_id;
use crate::router::RouterHandle;

/// Shared state for the WebSocket route
#[derive(Clone)]
pub struct RelayState {
    pub router: RouterHandle,
}

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<RelayState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle one control connection for its whole lifetime
pub async fn handle_socket(socket: WebSocket, state: RelayState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let client_id = generate_client_id();

    // Forward router output to the client
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg)).await.is_err() {
                break;
            }
        }
    });

    state.router.connect(client_id.clone(), tx);

    while let Some(result) = receiver.next().await {
        let msg = match result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!("WebSocket error for {}: {}", client_id, e);
                break;
            }
        };

        trace!("Received from {}: {}", client_id, msg);
        state.router.message(client_id.clone(), msg);
    }

    state.router.disconnect(client_id);
    send_task.abort();
}
