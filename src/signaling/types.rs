//! Signaling document types
//!
//! Field names follow the wire format shared with the browser dashboard, so
//! a room written by either side reads the same on the other.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use typeshare::typeshare;

/// Room status
#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Waiting,
    OfferSent,
    AnswerSent,
    Closed,
}

impl fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomStatus::Waiting => write!(f, "waiting"),
            RoomStatus::OfferSent => write!(f, "offer_sent"),
            RoomStatus::AnswerSent => write!(f, "answer_sent"),
            RoomStatus::Closed => write!(f, "closed"),
        }
    }
}

/// SDP type
#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// SDP blob as stored in a room's `offer`/`answer` field
#[typeshare]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub sdp: String,
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    #[serde(default)]
    pub from: String,
    /// RFC 3339 timestamp
    #[serde(default)]
    pub timestamp: String,
}

impl SessionDescription {
    pub fn new(sdp_type: SdpType, sdp: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            sdp_type,
            from: from.into(),
            timestamp: now_rfc3339(),
        }
    }
}

/// Room document
#[typeshare]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    #[serde(default)]
    pub created_at: String,
    pub status: RoomStatus,
    #[serde(default)]
    pub offer: Option<SessionDescription>,
    #[serde(default)]
    pub answer: Option<SessionDescription>,
}

impl Room {
    pub fn waiting() -> Self {
        Self {
            created_at: now_rfc3339(),
            status: RoomStatus::Waiting,
            offer: None,
            answer: None,
        }
    }
}

/// ICE candidate init, the browser's `RTCIceCandidateInit` shape
#[typeshare]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
}

/// Candidate document in a room's `ice_candidates` sub-collection
#[typeshare]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub candidate: IceCandidate,
    pub from: String,
    #[serde(default)]
    pub timestamp: String,
}

impl CandidateRecord {
    pub fn new(candidate: IceCandidate, from: impl Into<String>) -> Self {
        Self {
            candidate,
            from: from.into(),
            timestamp: now_rfc3339(),
        }
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}
