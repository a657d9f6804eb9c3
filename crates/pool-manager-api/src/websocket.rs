//! WebSocket handler for real-time updates

use axum::extract::ws::{Message, WebSocket};
use filtration_engine::ControllerEvent;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;

use crate::entities::EntityState;
use crate::AppState;

/// WebSocket events sent to clients
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsEvent {
    Connected,
    Pool { event: ControllerEvent },
    EntityChanged { entity: EntityState },
}

/// Handle a WebSocket connection
pub async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    if send_event(&mut sender, &WsEvent::Connected).await.is_err() {
        return;
    }

    // Forward pool and entity events to the client
    let mut pool_rx = state.pools.subscribe();
    let mut entity_rx = state.entities.subscribe();
    let send_task = tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                received = pool_rx.recv() => match received {
                    Ok(event) => WsEvent::Pool { event },
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                },
                received = entity_rx.recv() => match received {
                    Ok(entity) => WsEvent::EntityChanged { entity },
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                },
            };

            if send_event(&mut sender, &event).await.is_err() {
                break;
            }
        }
    });

    // Drain incoming messages until the client goes away
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }

    send_task.abort();
}

async fn send_event<S>(sender: &mut S, event: &WsEvent) -> Result<(), ()>
where
    S: SinkExt<Message> + Unpin,
{
    let json = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(e) => {
            tracing::warn!("Failed to serialize WebSocket event: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(json)).await.map_err(|_| ())
}
