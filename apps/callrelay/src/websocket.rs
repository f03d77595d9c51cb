// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Real-time call feed. Every connected client is one broadcaster subscription; the server
//! only pushes events and ignores anything the client sends.

use axum::extract::ws::{Message, WebSocket};
use opentelemetry::{global, KeyValue};
use serde::Serialize;
use std::sync::{Arc, OnceLock};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use crate::state::AppState;

/// Sends `message` as a JSON text frame. `Err(())` means the connection should be closed.
///
/// The `Sync` bound on `T` is required because the message reference crosses an `.await` point.
async fn send_json_message<T: Serialize + Sync>(
    socket: &mut WebSocket,
    message: &T,
    message_type: &str,
) -> Result<(), ()> {
    match serde_json::to_string(message) {
        Ok(json) => {
            if socket.send(Message::Text(json.into())).await.is_err() {
                debug!("Failed to send WebSocket {}", message_type);
                Err(())
            } else {
                Ok(())
            }
        },
        Err(e) => {
            error!(error = %e, "Failed to serialize {}", message_type);
            Err(())
        },
    }
}

#[derive(Clone)]
struct WebSocketMetrics {
    messages_counter: opentelemetry::metrics::Counter<u64>,
    errors_counter: opentelemetry::metrics::Counter<u64>,
}

impl WebSocketMetrics {
    fn shared() -> Self {
        static METRICS: OnceLock<WebSocketMetrics> = OnceLock::new();
        METRICS
            .get_or_init(|| {
                let meter = global::meter("callrelay_websocket");
                Self {
                    messages_counter: meter
                        .u64_counter("websocket.messages")
                        .with_description("Events pushed to WebSocket clients")
                        .build(),
                    errors_counter: meter
                        .u64_counter("websocket.errors")
                        .with_description("WebSocket errors")
                        .build(),
                }
            })
            .clone()
    }
}

pub async fn handle_websocket(mut socket: WebSocket, app_state: Arc<AppState>) {
    let metrics = WebSocketMetrics::shared();
    let mut subscription = app_state.broadcaster.subscribe();
    info!(connected_users = app_state.broadcaster.connected_users(), "WebSocket client connected");

    loop {
        tokio::select! {
            Some(msg) = socket.recv() => {
                match msg {
                    Ok(Message::Close(_)) => break,
                    Err(e) => {
                        debug!(error = %e, "WebSocket error");
                        metrics.errors_counter.add(1, &[KeyValue::new("error_type", "connection_error")]);
                        break;
                    },
                    // Pings are answered by axum; everything else is ignored.
                    Ok(_) => {},
                }
            },

            event_result = subscription.recv() => {
                let event = match event_result {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "WebSocket client lagged; dropping events to catch up");
                        metrics.errors_counter.add(1, &[KeyValue::new("error_type", "recv_lagged")]);
                        continue;
                    },
                    Err(RecvError::Closed) => {
                        warn!("Broadcast channel closed; terminating connection");
                        break;
                    },
                };

                metrics.messages_counter.add(1, &[]);
                if send_json_message(&mut socket, event.as_ref(), "event").await.is_err() {
                    metrics.errors_counter.add(1, &[KeyValue::new("error_type", "send_error")]);
                    break;
                }
            },

            else => break,
        }
    }

    drop(subscription);
    info!(connected_users = app_state.broadcaster.connected_users(), "WebSocket client disconnected");
}
