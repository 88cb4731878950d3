pub mod webrtc;

pub use webrtc::*;

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, State},
    http::{header, StatusCode},
    response::Response,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::control::{ControlSnapshot, ServoId};
use crate::control::types::SERVO_DEFAULT_ANGLE;
use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::stream::mjpeg::{spawn_test_pattern_stream, CONTENT_TYPE as MJPEG_CONTENT_TYPE};
use crate::webrtc::SessionInfo;

/// JSON request body whose rejection is reported as [`AppError::BadRequest`]
pub type JsonBody<T> = std::result::Result<Json<T>, JsonRejection>;

// ============================================================================
// Health
// ============================================================================

/// Health check response
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub build_date: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        build_date: env!("BUILD_DATE"),
    })
}

// ============================================================================
// Status
// ============================================================================

#[derive(Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub control: ControlSnapshot,
    pub session: SessionInfo,
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let (control, session) = tokio::join!(state.control.snapshot(), state.session_info());
    Json(StatusResponse { control, session })
}

// ============================================================================
// Control
// ============================================================================

#[derive(Deserialize)]
pub struct ControlRequest {
    #[serde(default)]
    pub command: String,
}

#[derive(Serialize)]
pub struct ControlResponse {
    pub status: &'static str,
    pub command: String,
    pub direction: String,
}

/// Movement command; unknown commands succeed without changing direction
pub async fn control(
    State(state): State<Arc<AppState>>,
    body: JsonBody<ControlRequest>,
) -> Result<Json<ControlResponse>> {
    let Json(req) = body?;
    let outcome = state.control.command(&req.command).await?;
    Ok(Json(ControlResponse {
        status: "success",
        command: outcome.command,
        direction: outcome.direction,
    }))
}

#[derive(Deserialize)]
pub struct ServoRequest {
    pub servo_id: Option<ServoId>,
    #[serde(default = "default_servo_angle")]
    pub angle: i64,
}

fn default_servo_angle() -> i64 {
    SERVO_DEFAULT_ANGLE
}

#[derive(Serialize)]
pub struct ServoResponse {
    pub status: &'static str,
    pub servo_id: ServoId,
    pub angle: u8,
}

pub async fn servo_control(
    State(state): State<Arc<AppState>>,
    body: JsonBody<ServoRequest>,
) -> Result<Json<ServoResponse>> {
    let Json(req) = body?;
    let servo_id = req
        .servo_id
        .ok_or_else(|| AppError::BadRequest("servo_id is required".to_string()))?;
    let angle = state.control.servo(servo_id.clone(), req.angle).await?;
    Ok(Json(ServoResponse {
        status: "success",
        servo_id,
        angle,
    }))
}

// ============================================================================
// MJPEG preview
// ============================================================================

/// Test-pattern MJPEG stream, only available when the video source is synthetic
pub async fn video_feed(State(state): State<Arc<AppState>>) -> Result<Response> {
    let video = state.config.get().video.clone();
    if !video.is_test_mode() {
        return Err(AppError::NotFound("video feed is available in test mode only".to_string()));
    }

    let mut rx = spawn_test_pattern_stream(&video, state.time_base)?;
    let body_stream = async_stream::stream! {
        while let Some(part) = rx.recv().await {
            yield Ok::<bytes::Bytes, std::io::Error>(part);
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, MJPEG_CONTENT_TYPE)
        .header(header::CACHE_CONTROL, "no-cache, no-store, must-revalidate")
        .header(header::PRAGMA, "no-cache")
        .header(header::EXPIRES, "0")
        .body(Body::from_stream(body_stream))
        .map_err(|e| AppError::Internal(format!("Failed to build response: {}", e)))
}

