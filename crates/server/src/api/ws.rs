//! Per-job WebSocket progress channel.
//!
//! A connection to `/ws/jobs/{id}` becomes one bus subscriber. The first
//! frame is a `status_update` snapshot, then live events follow, with a
//! heartbeat whenever the job is quiet. Clients may send `ping` or
//! `get_status`.

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use docfetch_core::{ClientMessage, ProgressError, ProgressEvent};

use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_MESSAGES_SENT};
use crate::state::AppState;

/// Replies queued by the receive loop for the send task.
const REPLY_BUFFER: usize = 16;

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(job_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, job_id, state))
}

fn encode(event: &ProgressEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            error!("Failed to serialize ProgressEvent: {}", e);
            None
        }
    }
}

/// Handle a single WebSocket connection.
async fn handle_socket(socket: WebSocket, job_id: String, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    let mut subscription = match state.bus().subscribe(&job_id) {
        Ok(subscription) => subscription,
        Err(e) => {
            let (code, reason) = match e {
                ProgressError::JobNotFound(_) => (close_code::POLICY, "Job not found"),
                _ => (close_code::ERROR, "Subscription failed"),
            };
            warn!(job_id = %job_id, error = %e, "Rejecting WebSocket subscriber");
            let _ = sender
                .send(Message::Close(Some(CloseFrame {
                    code,
                    reason: reason.into(),
                })))
                .await;
            return;
        }
    };

    // Track connection metrics
    WS_CONNECTIONS_TOTAL.inc();
    WS_CONNECTIONS_ACTIVE.inc();

    info!(job_id = %job_id, subscriber = subscription.id(), "WebSocket client connected");

    let (reply_tx, mut reply_rx) = mpsc::channel::<ProgressEvent>(REPLY_BUFFER);
    let bus = Arc::clone(state.bus());

    // Forward bus events and replies to this client
    let send_task = tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                event = subscription.next() => match event {
                    Some(event) => event,
                    None => {
                        debug!(job_id = %subscription.job_id(), "Subscriber dropped by bus");
                        break;
                    }
                },
                reply = reply_rx.recv() => match reply {
                    Some(event) => event,
                    // Receive loop ended
                    None => break,
                },
            };

            WS_MESSAGES_SENT
                .with_label_values(&[event.event_type()])
                .inc();

            if let Some(message) = encode(&event) {
                if sender.send(message).await.is_err() {
                    debug!("WebSocket send failed, client disconnected");
                    break;
                }
            }
        }
        bus.unsubscribe(&subscription);
        let _ = sender.close().await;
    });

    // Handle incoming messages from client
    while let Some(result) = receiver.next().await {
        match result {
            Ok(Message::Close(_)) => {
                debug!("WebSocket client requested close");
                break;
            }
            Ok(Message::Ping(data)) => {
                // Pong is handled automatically by axum
                debug!("Received ping: {:?}", data);
            }
            Ok(Message::Text(text)) => {
                let reply = match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(message) => match state.bus().answer(&job_id, message) {
                        Ok(reply) => reply,
                        Err(e) => ProgressEvent::error(job_id.clone(), e.to_string()),
                    },
                    Err(e) => {
                        debug!("Ignoring unrecognised client message: {}", e);
                        continue;
                    }
                };
                if reply_tx.send(reply).await.is_err() {
                    break;
                }
            }
            Ok(_) => {
                // Ignore other message types
            }
            Err(e) => {
                warn!("WebSocket receive error: {}", e);
                break;
            }
        }
    }

    // Clean up
    drop(reply_tx);
    let _ = send_task.await;
    WS_CONNECTIONS_ACTIVE.dec();
    info!(job_id = %job_id, "WebSocket client disconnected");
}
