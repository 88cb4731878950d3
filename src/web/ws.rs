//! WebSocket event channel
//!
//! Accepts `joystick_move` events from the dashboard, echoes a
//! `joystick_response`, and forwards event bus traffic (session state,
//! direction and servo changes) to the client. A ping goes out every 30s,
//! and the socket is closed when the process shuts down.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::control::JoystickVector;
use crate::state::AppState;
use crate::utils::LogThrottler;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Client-to-server message
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data")]
enum ClientMessage {
    #[serde(rename = "joystick_move")]
    JoystickMove(JoystickVector),
}

/// Server-to-client message that is not a bus event
#[derive(Debug, Serialize)]
#[serde(tag = "event", content = "data")]
enum ServerMessage {
    #[serde(rename = "connection_response")]
    ConnectionResponse { status: &'static str },
    #[serde(rename = "joystick_response")]
    JoystickResponse { x: f64, y: f64, status: &'static str },
    #[serde(rename = "error")]
    Error { message: String },
}

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut event_rx = state.events.subscribe();
    let mut shutdown_rx = state.shutdown_signal();
    let throttler = LogThrottler::with_secs(5);

    info!("WebSocket client connected");
    if send_json(&mut sender, &ServerMessage::ConnectionResponse { status: "connected" })
        .await
        .is_err()
    {
        return;
    }

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    // First tick completes immediately
    heartbeat.tick().await;

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = handle_client_message(&state, &text, &throttler).await;
                        if send_json(&mut sender, &reply).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!("WebSocket receive error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }

            event = event_rx.recv() => {
                match event {
                    Ok(event) => {
                        if send_json(&mut sender, &event).await.is_err() {
                            warn!("Failed to send event to client, disconnecting");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("WebSocket client lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            _ = shutdown_rx.recv() => {
                debug!("Closing WebSocket for shutdown");
                let _ = sender.send(Message::Close(None)).await;
                break;
            }

            _ = heartbeat.tick() => {
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    info!("WebSocket client disconnected");
}

async fn handle_client_message(state: &AppState, text: &str, throttler: &LogThrottler) -> ServerMessage {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            let event = serde_json::from_str::<Value>(text)
                .ok()
                .and_then(|v| v.get("event").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_default();
            debug!("Ignoring client message {:?}: {}", event, e);
            return ServerMessage::Error {
                message: format!("unsupported message: {}", e),
            };
        }
    };

    match message {
        ClientMessage::JoystickMove(vector) => {
            if throttler.should_log("joystick") {
                debug!("Joystick: x={} y={}", vector.x, vector.y);
            }
            if let Err(e) = state.control.joystick(vector).await {
                warn!("Joystick command failed: {}", e);
                return ServerMessage::Error {
                    message: e.to_string(),
                };
            }
            ServerMessage::JoystickResponse {
                x: vector.x,
                y: vector.y,
                status: "received",
            }
        }
    }
}

async fn send_json<S, T>(sender: &mut S, value: &T) -> Result<(), ()>
where
    S: SinkExt<Message> + Unpin,
    T: Serialize,
{
    let json = serde_json::to_string(value).map_err(|e| warn!("Failed to serialize message: {}", e))?;
    sender.send(Message::Text(json)).await.map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_joystick_move() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"event":"joystick_move","data":{"x":-20,"y":55.5}}"#).unwrap();
        let ClientMessage::JoystickMove(v) = msg;
        assert_eq!(v, JoystickVector { x: -20.0, y: 55.5 });
    }

    #[test]
    fn test_server_message_shape() {
        let json = serde_json::to_value(ServerMessage::JoystickResponse {
            x: 1.0,
            y: -1.0,
            status: "received",
        })
        .unwrap();
        assert_eq!(json["event"], "joystick_response");
        assert_eq!(json["data"]["status"], "received");

        let json = serde_json::to_value(ServerMessage::ConnectionResponse { status: "connected" }).unwrap();
        assert_eq!(json, serde_json::json!({"event": "connection_response", "data": {"status": "connected"}}));
    }
}
