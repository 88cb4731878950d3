//! Viewer-side signaling routes
//!
//! The dashboard has no direct store access, so it reads the offer and the
//! sender's candidates by polling, and writes its answer and candidates
//! through these routes.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use super::JsonBody;
use crate::error::{AppError, Result};
use crate::signaling::{sdp_from_value, IceCandidate, RoomStatus, SessionDescription};
use crate::state::AppState;

#[derive(Serialize)]
pub struct IceServerInfo {
    pub urls: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebRtcConfigResponse {
    pub ice_servers: Vec<IceServerInfo>,
    pub room_id: String,
    /// Device id the dashboard should sign its writes with
    pub device_id: String,
}

pub async fn webrtc_config(State(state): State<Arc<AppState>>) -> Json<WebRtcConfigResponse> {
    let config = state.config.get();
    Json(WebRtcConfigResponse {
        ice_servers: config
            .webrtc
            .ice_servers
            .iter()
            .map(|url| IceServerInfo { urls: url.clone() })
            .collect(),
        room_id: config.webrtc.room_id.clone(),
        device_id: config.webrtc.viewer_device_id.clone(),
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferResponse {
    pub room_id: String,
    pub offer: Option<SessionDescription>,
}

pub async fn webrtc_offer(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> Result<Json<OfferResponse>> {
    let offer = state.signaling.get_offer(&room_id).await?;
    Ok(Json(OfferResponse { room_id, offer }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidatesQuery {
    pub device_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateInfo {
    pub id: String,
    pub candidate: String,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
    pub sdp_mid: Option<String>,
    pub from: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidatesResponse {
    pub room_id: String,
    pub candidates: Vec<CandidateInfo>,
}

/// Candidates not written by `deviceId` (the viewer by default)
pub async fn webrtc_ice_candidates(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    Query(query): Query<CandidatesQuery>,
) -> Result<Json<CandidatesResponse>> {
    let exclude = query
        .device_id
        .unwrap_or_else(|| state.config.get().webrtc.viewer_device_id.clone());

    let candidates = state
        .signaling
        .list_ice_candidates(&room_id, Some(&exclude))
        .await?
        .into_iter()
        .map(|stored| CandidateInfo {
            id: stored.id,
            candidate: stored.record.candidate.candidate,
            sdp_mline_index: stored.record.candidate.sdp_mline_index,
            sdp_mid: stored.record.candidate.sdp_mid,
            from: stored.record.from,
        })
        .collect();

    Ok(Json(CandidatesResponse { room_id, candidates }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRequest {
    pub room_id: Option<String>,
    /// SDP string or `{sdp, type}`
    pub answer: Value,
    pub device_id: Option<String>,
}

#[derive(Serialize)]
pub struct SuccessResponse {
    pub status: &'static str,
}

pub async fn webrtc_answer(
    State(state): State<Arc<AppState>>,
    body: JsonBody<AnswerRequest>,
) -> Result<Json<SuccessResponse>> {
    let Json(req) = body?;
    let config = state.config.get();
    let room_id = req.room_id.unwrap_or_else(|| config.webrtc.room_id.clone());
    let device_id = req
        .device_id
        .unwrap_or_else(|| config.webrtc.viewer_device_id.clone());

    let sdp = sdp_from_value(&req.answer)
        .ok_or_else(|| AppError::BadRequest("answer must be an SDP string or {sdp, type}".to_string()))?;

    if let Err(e) = state.signaling.write_answer(&room_id, &sdp, &device_id).await {
        warn!(room_id = %room_id, device_id = %device_id, "Failed to write answer: {}", e);
        return Err(e);
    }
    info!(room_id = %room_id, device_id = %device_id, "Answer received from dashboard");

    Ok(Json(SuccessResponse { status: "success" }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateRequest {
    pub room_id: Option<String>,
    pub candidate: IceCandidate,
    pub device_id: Option<String>,
}

#[derive(Serialize)]
pub struct CandidateAdded {
    pub status: &'static str,
    pub id: String,
}

pub async fn webrtc_ice_candidate(
    State(state): State<Arc<AppState>>,
    body: JsonBody<CandidateRequest>,
) -> Result<Json<CandidateAdded>> {
    let Json(req) = body?;
    let config = state.config.get();
    let room_id = req.room_id.unwrap_or_else(|| config.webrtc.room_id.clone());
    let device_id = req
        .device_id
        .unwrap_or_else(|| config.webrtc.viewer_device_id.clone());

    let id = state
        .signaling
        .add_ice_candidate(&room_id, &req.candidate, &device_id)
        .await
        .inspect_err(|e| {
            warn!(room_id = %room_id, device_id = %device_id, "Failed to add ICE candidate: {}", e)
        })?;

    Ok(Json(CandidateAdded {
        status: "success",
        id,
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStatusResponse {
    pub room_id: String,
    /// None when the room does not exist
    pub status: Option<RoomStatus>,
}

pub async fn webrtc_status(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> Result<Json<RoomStatusResponse>> {
    let status = state.signaling.room_status(&room_id).await?;
    Ok(Json(RoomStatusResponse { room_id, status }))
}
