use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};

use crate::events::{Topic, TrackingEvent};
use crate::state::AppState;

/// Room protocol: clients send `{"join":"order-<id>"}` or
/// `{"join":"agent-<id>"}` (and `"leave"` likewise); the server forwards
/// every event published on the joined topics as JSON text frames.
#[derive(Deserialize)]
struct ClientCommand {
    join: Option<String>,
    leave: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Message>(64);

    info!("websocket client connected");

    let send_task = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    let mut rooms: HashMap<Topic, JoinHandle<()>> = HashMap::new();

    while let Some(Ok(msg)) = receiver.next().await {
        let Message::Text(text) = msg else { continue };

        let command = match serde_json::from_str::<ClientCommand>(&text) {
            Ok(command) => command,
            Err(err) => {
                warn!(error = %err, "unparseable ws command");
                continue;
            }
        };

        if let Some(raw) = &command.join {
            match raw.parse::<Topic>() {
                Ok(topic) => {
                    rooms.entry(topic).or_insert_with(|| {
                        let stream = BroadcastStream::new(
                            state.events.subscribe(topic).into_receiver(),
                        );
                        tokio::spawn(forward_topic(stream, out_tx.clone()))
                    });
                }
                Err(err) => warn!(error = %err, "rejected ws join"),
            }
        }

        if let Some(raw) = &command.leave {
            if let Ok(topic) = raw.parse::<Topic>() {
                if let Some(handle) = rooms.remove(&topic) {
                    handle.abort();
                }
            }
        }
    }

    for handle in rooms.into_values() {
        handle.abort();
    }
    send_task.abort();

    info!("websocket client disconnected");
}

async fn forward_topic(mut stream: BroadcastStream<TrackingEvent>, tx: mpsc::Sender<Message>) {
    while let Some(result) = stream.next().await {
        // a lagged subscriber skips the events it lost, oldest first
        let Ok(event) = result else { continue };

        let json = match serde_json::to_string(&event) {
            Ok(json) => json,
            Err(err) => {
                warn!(error = %err, "failed to serialize event for ws");
                continue;
            }
        };

        if tx.send(Message::Text(json)).await.is_err() {
            break;
        }
    }
}
