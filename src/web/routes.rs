use axum::{
    routing::{any, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers;
use super::ws::ws_handler;
use crate::state::AppState;

/// Create the main application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let control_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/status", get(handlers::status))
        .route("/control", post(handlers::control))
        .route("/servo_control", post(handlers::servo_control))
        .route("/video_feed", get(handlers::video_feed))
        // Event channel (joystick, state updates)
        .route("/ws", any(ws_handler));

    let webrtc_routes = Router::new()
        .route("/webrtc/config", get(handlers::webrtc_config))
        .route("/webrtc/offer/:room_id", get(handlers::webrtc_offer))
        .route("/webrtc/answer", post(handlers::webrtc_answer))
        .route("/webrtc/ice-candidate", post(handlers::webrtc_ice_candidate))
        .route("/webrtc/ice-candidates/:room_id", get(handlers::webrtc_ice_candidates))
        .route("/webrtc/status/:room_id", get(handlers::webrtc_status));

    Router::new()
        .merge(control_routes)
        .merge(webrtc_routes)
        .merge(super::static_files::static_file_router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigStore, VideoSourceKind};
    use crate::control::{ControlRelay, LoggingActuator};
    use crate::events::EventBus;
    use crate::signaling::{MemoryDocumentStore, SignalingClient};
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tokio::sync::broadcast;
    use tower::ServiceExt;

    const ROOM: &str = "rpi_car_stream";

    async fn test_state() -> (Arc<AppState>, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigStore::new(&dir.path().join("rover-dash.db")).await.unwrap();
        let signaling = Arc::new(SignalingClient::new(
            Arc::new(MemoryDocumentStore::new()),
            "webrtc_signaling",
        ));
        let events = Arc::new(EventBus::new());
        let control = Arc::new(ControlRelay::new(Arc::new(LoggingActuator::new()), events.clone()));
        let (shutdown_tx, _) = broadcast::channel(1);
        let state = AppState::new(
            config,
            signaling,
            control,
            events,
            shutdown_tx,
        );
        (state, dir)
    }

    async fn send(state: &Arc<AppState>, request: Request<Body>) -> (StatusCode, Value) {
        let response = create_router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, json)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (state, _dir) = test_state().await;
        let (status, body) = send(&state, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
        assert!(body["buildDate"].is_string());
    }

    #[tokio::test]
    async fn test_control_forward() {
        let (state, _dir) = test_state().await;
        let (status, body) = send(&state, post("/control", json!({"command": "forward"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"status": "success", "command": "forward", "direction": "FORWARD"})
        );
    }

    #[tokio::test]
    async fn test_control_unknown_keeps_direction() {
        let (state, _dir) = test_state().await;
        send(&state, post("/control", json!({"command": "right"}))).await;
        let (status, body) = send(&state, post("/control", json!({"command": "fly"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["command"], "fly");
        assert_eq!(body["direction"], "RIGHT");
    }

    #[tokio::test]
    async fn test_malformed_body_uses_error_shape() {
        let (state, _dir) = test_state().await;

        let raw = |uri: &str, content_type: Option<&str>, body: &str| {
            let mut builder = Request::builder().method("POST").uri(uri);
            if let Some(content_type) = content_type {
                builder = builder.header(header::CONTENT_TYPE, content_type);
            }
            builder.body(Body::from(body.to_string())).unwrap()
        };

        let cases = [
            raw("/control", Some("application/json"), "{not json"),
            raw("/control", None, r#"{"command": "forward"}"#),
            raw("/servo_control", Some("application/json"), r#"{"servo_id": 1, "angle": "wide"}"#),
            raw("/webrtc/ice-candidate", Some("application/json"), r#"{"candidate": 5}"#),
        ];
        for request in cases {
            let uri = request.uri().to_string();
            let (status, body) = send(&state, request).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
            assert_eq!(body["status"], "error", "{}", uri);
            assert!(body["error"].is_string(), "{}", uri);
        }
        assert_eq!(state.control.snapshot().await.direction, "STOP");
    }

    #[tokio::test]
    async fn test_servo_clamp() {
        let (state, _dir) = test_state().await;

        let (_, body) = send(&state, post("/servo_control", json!({"servo_id": 1, "angle": 200}))).await;
        assert_eq!(body, json!({"status": "success", "servo_id": 1, "angle": 180}));

        let (_, body) = send(&state, post("/servo_control", json!({"servo_id": "pan", "angle": -30}))).await;
        assert_eq!(body["servo_id"], "pan");
        assert_eq!(body["angle"], 0);

        let (_, body) = send(&state, post("/servo_control", json!({"servo_id": 2}))).await;
        assert_eq!(body["angle"], 90);

        let (status, body) = send(&state, post("/servo_control", json!({"angle": 10}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn test_status_reports_control_and_session() {
        let (state, _dir) = test_state().await;
        send(&state, post("/control", json!({"command": "backward"}))).await;
        send(&state, post("/servo_control", json!({"servo_id": 1, "angle": 45}))).await;

        let (status, body) = send(&state, get("/status")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["direction"], "BACKWARD");
        assert_eq!(body["servos"]["1"], 45);
        assert_eq!(body["joystick"], json!({"x": 0.0, "y": 0.0}));
        assert_eq!(body["session"]["state"], "idle");
        assert_eq!(body["session"]["roomId"], ROOM);
        assert_eq!(body["session"]["lastError"], Value::Null);
    }

    #[tokio::test]
    async fn test_webrtc_config() {
        let (state, _dir) = test_state().await;
        let (_, body) = send(&state, get("/webrtc/config")).await;
        assert_eq!(body["roomId"], ROOM);
        assert_eq!(body["deviceId"], "dashboard_viewer");
        assert_eq!(body["iceServers"].as_array().unwrap().len(), 5);
        assert_eq!(body["iceServers"][0]["urls"], "stun:stun.l.google.com:19302");
    }

    #[tokio::test]
    async fn test_room_status() {
        let (state, _dir) = test_state().await;
        let (status, body) = send(&state, get("/webrtc/status/nowhere")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"roomId": "nowhere", "status": null}));

        state.signaling.create_room(ROOM).await.unwrap();
        let (_, body) = send(&state, get(&format!("/webrtc/status/{}", ROOM))).await;
        assert_eq!(body["status"], "waiting");
    }

    #[tokio::test]
    async fn test_viewer_answer_flow() {
        let (state, _dir) = test_state().await;
        state.signaling.create_room(ROOM).await.unwrap();
        state
            .signaling
            .write_offer(ROOM, "v=0 offer", "rpi_car_camera")
            .await
            .unwrap();

        let (_, body) = send(&state, get(&format!("/webrtc/offer/{}", ROOM))).await;
        assert_eq!(body["offer"]["sdp"], "v=0 offer");
        assert_eq!(body["offer"]["type"], "offer");

        let (status, body) = send(
            &state,
            post("/webrtc/answer", json!({"answer": {"sdp": "v=0 answer", "type": "answer"}})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "success"}));

        let room = state.signaling.get_room(ROOM).await.unwrap().unwrap();
        let answer = room.answer.unwrap();
        assert_eq!(answer.sdp, "v=0 answer");
        assert_eq!(answer.from, "dashboard_viewer");
        assert_eq!(room.status.to_string(), "answer_sent");
    }

    #[tokio::test]
    async fn test_answer_to_missing_room() {
        let (state, _dir) = test_state().await;
        let (status, body) = send(
            &state,
            post("/webrtc/answer", json!({"roomId": "gone", "answer": "v=0"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], "error");

        let (status, _) = send(&state, post("/webrtc/answer", json!({"answer": 42}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_candidates_round_trip_through_routes() {
        let (state, _dir) = test_state().await;
        state.signaling.create_room(ROOM).await.unwrap();
        let sender_candidate = crate::signaling::IceCandidate {
            candidate: "candidate:1 1 udp 1 10.0.0.2 5000 typ host".to_string(),
            sdp_mline_index: Some(0),
            sdp_mid: Some("0".to_string()),
        };
        state
            .signaling
            .add_ice_candidate(ROOM, &sender_candidate, "rpi_car_camera")
            .await
            .unwrap();

        let (status, body) = send(
            &state,
            post(
                "/webrtc/ice-candidate",
                json!({"candidate": {"candidate": "candidate:2 1 udp 1 10.0.0.3 6000 typ host", "sdpMLineIndex": 0, "sdpMid": "0"}}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert!(body["id"].is_string());

        // Viewer sees only the sender's candidate
        let (_, body) = send(&state, get(&format!("/webrtc/ice-candidates/{}", ROOM))).await;
        let candidates = body["candidates"].as_array().unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0]["from"], "rpi_car_camera");
        assert_eq!(candidates[0]["sdpMLineIndex"], 0);

        let (_, body) = send(
            &state,
            get(&format!("/webrtc/ice-candidates/{}?deviceId=rpi_car_camera", ROOM)),
        )
        .await;
        let candidates = body["candidates"].as_array().unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0]["from"], "dashboard_viewer");
    }

    #[tokio::test]
    async fn test_video_feed_test_mode_only() {
        let (state, _dir) = test_state().await;
        state.config.override_runtime(|c| {
            c.video.width = 64;
            c.video.height = 48;
        });
        let response = create_router(state.clone()).oneshot(get("/video_feed")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "multipart/x-mixed-replace; boundary=frame"
        );
        drop(response);

        state
            .config
            .override_runtime(|c| c.video.source = VideoSourceKind::Camera);
        let (status, body) = send(&state, get("/video_feed")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn test_index_served() {
        let (state, _dir) = test_state().await;
        let response = create_router(state).oneshot(get("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/html"));
    }

    #[tokio::test]
    async fn test_ws_joystick_and_events() {
        use futures::{SinkExt, StreamExt};
        use std::time::Duration;
        use tokio_tungstenite::tungstenite::Message;

        let (state, _dir) = test_state().await;
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = create_router(state.clone());
        tokio::spawn(async move { axum::serve(listener, app).await });

        let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr))
            .await
            .unwrap();

        async fn next_event(
            socket: &mut (impl StreamExt<Item = tokio_tungstenite::tungstenite::Result<Message>> + Unpin),
            event: &str,
        ) -> Value {
            loop {
                let msg = tokio::time::timeout(Duration::from_secs(2), socket.next())
                    .await
                    .unwrap()
                    .unwrap()
                    .unwrap();
                if let Message::Text(text) = msg {
                    let json: Value = serde_json::from_str(&text).unwrap();
                    if json["event"] == event {
                        return json["data"].clone();
                    }
                }
            }
        }

        let data = next_event(&mut socket, "connection_response").await;
        assert_eq!(data["status"], "connected");

        socket
            .send(Message::Text(
                json!({"event": "joystick_move", "data": {"x": 40, "y": -10}}).to_string(),
            ))
            .await
            .unwrap();
        let data = next_event(&mut socket, "joystick_response").await;
        assert_eq!(data, json!({"x": 40.0, "y": -10.0, "status": "received"}));
        assert_eq!(state.control.snapshot().await.joystick.x, 40.0);

        // Bus events reach connected clients
        state.control.command("left").await.unwrap();
        let data = next_event(&mut socket, "control.direction_changed").await;
        assert_eq!(data["direction"], "LEFT");
    }

    #[tokio::test]
    async fn test_ws_closed_on_shutdown() {
        use futures::StreamExt;
        use std::time::Duration;
        use tokio_tungstenite::tungstenite::Message;

        let (state, _dir) = test_state().await;
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = create_router(state.clone());
        tokio::spawn(async move { axum::serve(listener, app).await });

        let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr))
            .await
            .unwrap();
        // connection_response means the handler is subscribed
        let first = socket.next().await.unwrap().unwrap();
        assert!(matches!(first, Message::Text(_)));

        state.shutdown_tx.send(()).unwrap();

        let closed = tokio::time::timeout(Duration::from_secs(2), async {
            while let Some(msg) = socket.next().await {
                match msg {
                    Ok(Message::Close(_)) | Err(_) => return true,
                    Ok(_) => {}
                }
            }
            true
        })
        .await
        .unwrap();
        assert!(closed);
    }
}
