//! Live observer socket.
//!
//! Server -> client (JSON text):
//! ```json
//! {"type": "hello", "observerId": "0b7e..."}
//! {"type": "receipt", "documentId": "65f0..."}
//! ```
//!
//! A client tags its own broker publications with the `x-observer-id`
//! header set to its `observerId` and is skipped by the resulting fan-out.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use queue_relay::{ObserverHub, ObserverId};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

use crate::server::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let hub = state.relay.observers().clone();
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

pub fn hello_message(id: ObserverId) -> String {
    json!({ "type": "hello", "observerId": id }).to_string()
}

async fn handle_socket(socket: WebSocket, hub: Arc<ObserverHub>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (observer_id, mut rx) = hub.register();
    info!(observer = %observer_id, observers = hub.len(), "observer connected");

    if ws_sender
        .send(Message::Text(hello_message(observer_id).into()))
        .await
        .is_err()
    {
        hub.unregister(observer_id);
        return;
    }

    let sender_task = tokio::spawn(async move {
        while let Some(update) = rx.recv().await {
            if ws_sender.send(Message::Text(update.into())).await.is_err() {
                break;
            }
        }
    });

    // Observers are receive-only; inbound frames only matter for close.
    while let Some(Ok(msg)) = ws_receiver.next().await {
        match msg {
            Message::Close(_) => break,
            other => debug!(observer = %observer_id, frame = ?other, "ignoring observer frame"),
        }
    }

    hub.unregister(observer_id);
    sender_task.abort();
    info!(observer = %observer_id, "observer disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hello_names_the_observer() {
        let id = ObserverId::new();
        let hello: serde_json::Value = serde_json::from_str(&hello_message(id)).unwrap();
        assert_eq!(hello["type"], "hello");
        assert_eq!(hello["observerId"], id.to_string());
    }
}
