//! Peer connection handle
//!
//! The lifecycle manager only talks to [`PeerHandle`], so negotiation can be
//! exercised without a network stack. [`WebRtcPeer`] is the real handle,
//! built on webrtc-rs with one outbound H264 track.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use super::config::ice_servers;
use super::track::VideoTrack;
use crate::config::VideoConfig;
use crate::error::{AppError, Result};
use crate::signaling::IceCandidate;
use crate::video::TimeBase;

/// Gathered candidates waiting to be published
const LOCAL_CANDIDATE_CAPACITY: usize = 64;

/// Connection state as reported by the WebRTC engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerState::New => write!(f, "new"),
            PeerState::Connecting => write!(f, "connecting"),
            PeerState::Connected => write!(f, "connected"),
            PeerState::Disconnected => write!(f, "disconnected"),
            PeerState::Failed => write!(f, "failed"),
            PeerState::Closed => write!(f, "closed"),
        }
    }
}

/// The offering side of one peer connection
#[async_trait]
pub trait PeerHandle: Send + Sync {
    /// Create an offer, apply it locally and return its SDP
    async fn create_offer(&self) -> Result<String>;

    /// Apply the remote answer SDP
    async fn apply_answer(&self, sdp: &str) -> Result<()>;

    /// Apply a remote candidate. Requires the answer to be applied first.
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    fn state_watch(&self) -> watch::Receiver<PeerState>;

    /// Locally gathered candidates. Returns the receiver once.
    fn take_local_candidates(&self) -> Option<mpsc::Receiver<IceCandidate>>;

    /// Stop the outbound track and close the connection. Idempotent.
    async fn close(&self) -> Result<()>;
}

/// Creates a fresh [`PeerHandle`] for each negotiation attempt
#[async_trait]
pub trait PeerFactory: Send + Sync {
    async fn create(&self) -> Result<Arc<dyn PeerHandle>>;
}

/// webrtc-rs peer connection with an outbound video track
pub struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
    video_track: VideoTrack,
    state_rx: watch::Receiver<PeerState>,
    local_candidates: parking_lot::Mutex<Option<mpsc::Receiver<IceCandidate>>>,
    closed: AtomicBool,
}

impl WebRtcPeer {
    pub async fn new(ice_urls: &[String], video: VideoConfig, time_base: TimeBase) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| AppError::PeerConnectionError(format!("Failed to register codecs: {}", e)))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(|e| {
            AppError::PeerConnectionError(format!("Failed to register interceptors: {}", e))
        })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: ice_servers(ice_urls),
            ..Default::default()
        };

        let pc = Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
            AppError::PeerConnectionError(format!("Failed to create peer connection: {}", e))
        })?);

        let (state_tx, state_rx) = watch::channel(PeerState::New);
        let state_tx = Arc::new(state_tx);
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            let state_tx = state_tx.clone();
            Box::pin(async move {
                let new_state = match s {
                    RTCPeerConnectionState::New => PeerState::New,
                    RTCPeerConnectionState::Connecting => PeerState::Connecting,
                    RTCPeerConnectionState::Connected => PeerState::Connected,
                    RTCPeerConnectionState::Disconnected => PeerState::Disconnected,
                    RTCPeerConnectionState::Failed => PeerState::Failed,
                    RTCPeerConnectionState::Closed => PeerState::Closed,
                    _ => return,
                };
                info!("Peer connection state: {}", new_state);
                let _ = state_tx.send(new_state);
            })
        }));

        let (candidate_tx, candidate_rx) = mpsc::channel(LOCAL_CANDIDATE_CAPACITY);
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let candidate_tx = candidate_tx.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    debug!("ICE gathering complete");
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        trace!("Local ICE candidate: {}", init.candidate);
                        let _ = candidate_tx
                            .send(IceCandidate {
                                candidate: init.candidate,
                                sdp_mline_index: init.sdp_mline_index,
                                sdp_mid: init.sdp_mid,
                            })
                            .await;
                    }
                    Err(e) => debug!("Failed to serialize ICE candidate: {}", e),
                }
            })
        }));

        let video_track = VideoTrack::new("video", "rover-dash");
        let rtp_sender = pc
            .add_track(video_track.track_local())
            .await
            .map_err(|e| AppError::PeerConnectionError(format!("Failed to add video track: {}", e)))?;

        // Interceptors only run while RTCP is being read
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while rtp_sender.read(&mut rtcp_buf).await.is_ok() {}
            trace!("RTCP reader exited");
        });

        video_track.start(video, time_base, state_rx.clone());

        Ok(Self {
            pc,
            video_track,
            state_rx,
            local_candidates: parking_lot::Mutex::new(Some(candidate_rx)),
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl PeerHandle for WebRtcPeer {
    async fn create_offer(&self) -> Result<String> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| AppError::PeerConnectionError(format!("Failed to create offer: {}", e)))?;
        let sdp = offer.sdp.clone();

        self.pc.set_local_description(offer).await.map_err(|e| {
            AppError::PeerConnectionError(format!("Failed to set local description: {}", e))
        })?;

        Ok(sdp)
    }

    async fn apply_answer(&self, sdp: &str) -> Result<()> {
        let answer = RTCSessionDescription::answer(sdp.to_string())
            .map_err(|e| AppError::PeerConnectionError(format!("Invalid SDP answer: {}", e)))?;

        self.pc.set_remote_description(answer).await.map_err(|e| {
            AppError::PeerConnectionError(format!("Failed to set remote description: {}", e))
        })
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        };

        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| AppError::PeerConnectionError(format!("Failed to add ICE candidate: {}", e)))
    }

    fn state_watch(&self) -> watch::Receiver<PeerState> {
        self.state_rx.clone()
    }

    fn take_local_candidates(&self) -> Option<mpsc::Receiver<IceCandidate>> {
        self.local_candidates.lock().take()
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.video_track.stop().await;
        self.pc
            .close()
            .await
            .map_err(|e| AppError::PeerConnectionError(format!("Failed to close peer connection: {}", e)))?;

        debug!("Peer connection closed");
        Ok(())
    }
}

/// Builds [`WebRtcPeer`]s from configuration
pub struct WebRtcPeerFactory {
    ice_servers: Vec<String>,
    video: VideoConfig,
    time_base: TimeBase,
}

impl WebRtcPeerFactory {
    pub fn new(ice_servers: Vec<String>, video: VideoConfig, time_base: TimeBase) -> Self {
        Self {
            ice_servers,
            video,
            time_base,
        }
    }
}

#[async_trait]
impl PeerFactory for WebRtcPeerFactory {
    async fn create(&self) -> Result<Arc<dyn PeerHandle>> {
        let peer = WebRtcPeer::new(&self.ice_servers, self.video.clone(), self.time_base).await?;
        Ok(Arc::new(peer))
    }
}
