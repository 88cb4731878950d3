//! Sender-side session lifecycle
//!
//! ```text
//! idle -> offering -> awaiting_answer -> connected
//!                          |                 |
//!                          +----> failed <---+
//!                                   |
//!                             reconnecting -> (teardown) -> idle -> ...
//! ```
//!
//! One task owns the peer handle for the life of an attempt. Answers, remote
//! candidates, local candidates and peer state changes are all funneled into
//! that task, so handle mutations never interleave.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::peer::{PeerFactory, PeerHandle, PeerState};
use crate::config::WebRtcConfig;
use crate::error::{AppError, Result};
use crate::events::{EventBus, SystemEvent};
use crate::signaling::{IceCandidate, SignalingClient};

/// Upper bound for each teardown step
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(3);

/// Lifecycle state of the sender session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Offering,
    AwaitingAnswer,
    Connected,
    Failed,
    Reconnecting,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Offering => "offering",
            SessionState::AwaitingAnswer => "awaiting_answer",
            SessionState::Connected => "connected",
            SessionState::Failed => "failed",
            SessionState::Reconnecting => "reconnecting",
            SessionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub room_id: String,
    /// Device id written on offers and local candidates
    pub device_id: String,
    pub reconnect_delay: Duration,
}

impl SessionConfig {
    pub fn from_webrtc(config: &WebRtcConfig) -> Self {
        Self {
            room_id: config.room_id.clone(),
            device_id: config.sender_device_id.clone(),
            reconnect_delay: Duration::from_secs(config.reconnect_delay_secs),
        }
    }
}

/// Snapshot for status queries
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub state: SessionState,
    pub room_id: String,
    pub attempt: u64,
    pub last_error: Option<String>,
}

#[derive(Default)]
struct Progress {
    attempt: u64,
    last_error: Option<String>,
}

/// How a negotiation attempt ended
enum Exit {
    Stopped,
    PeerFailed,
    Error(AppError),
}

struct Inner {
    config: SessionConfig,
    signaling: Arc<SignalingClient>,
    factory: Arc<dyn PeerFactory>,
    events: Arc<EventBus>,
    state: watch::Sender<SessionState>,
    progress: parking_lot::Mutex<Progress>,
    cancel: CancellationToken,
}

/// The camera-sender lifecycle manager
pub struct StreamSession {
    inner: Arc<Inner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StreamSession {
    /// Spawn the session task, starting from `idle`
    pub fn start(
        config: SessionConfig,
        signaling: Arc<SignalingClient>,
        factory: Arc<dyn PeerFactory>,
        events: Arc<EventBus>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        let inner = Arc::new(Inner {
            config,
            signaling,
            factory,
            events,
            state,
            progress: parking_lot::Mutex::new(Progress::default()),
            cancel: CancellationToken::new(),
        });

        info!(
            room_id = %inner.config.room_id,
            device_id = %inner.config.device_id,
            "Starting stream session"
        );
        let task = tokio::spawn(inner.clone().run());

        Self {
            inner,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    pub fn state_watch(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn room_id(&self) -> &str {
        &self.inner.config.room_id
    }

    pub fn info(&self) -> SessionInfo {
        let progress = self.inner.progress.lock();
        SessionInfo {
            state: self.state(),
            room_id: self.inner.config.room_id.clone(),
            attempt: progress.attempt,
            last_error: progress.last_error.clone(),
        }
    }

    /// Close the peer, stop the video track and clean up the room
    ///
    /// Cancels a pending answer wait or reconnect delay. Returns once the
    /// session task has finished; later calls return immediately.
    pub async fn stop(&self) {
        self.inner.cancel.cancel();
        let mut task = self.task.lock().await;
        if let Some(handle) = task.take() {
            if let Err(e) = handle.await {
                error!("Stream session task failed: {}", e);
            }
        }
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

impl Inner {
    async fn run(self: Arc<Self>) {
        let mut attempt = 0u64;
        loop {
            attempt += 1;
            self.progress.lock().attempt = attempt;

            let mut peer = None;
            // Store and peer calls may stall; stop() must not wait on them
            let exit = tokio::select! {
                _ = self.cancel.cancelled() => Exit::Stopped,
                result = self.negotiate(attempt, &mut peer) => match result {
                    Ok(exit) => exit,
                    Err(e) => Exit::Error(e),
                },
            };

            match exit {
                Exit::Stopped => {
                    self.teardown(peer).await;
                    break;
                }
                Exit::PeerFailed => {
                    self.set_state(SessionState::Reconnecting, attempt);
                    info!(
                        room_id = %self.config.room_id,
                        attempt,
                        "Reconnecting in {:?}",
                        self.config.reconnect_delay
                    );
                    let cancelled = tokio::select! {
                        _ = self.cancel.cancelled() => true,
                        _ = tokio::time::sleep(self.config.reconnect_delay) => false,
                    };
                    self.teardown(peer).await;
                    if cancelled {
                        break;
                    }
                    self.set_state(SessionState::Idle, attempt);
                }
                Exit::Error(e) => {
                    error!(
                        room_id = %self.config.room_id,
                        device_id = %self.config.device_id,
                        attempt,
                        "Negotiation failed: {}",
                        e
                    );
                    self.progress.lock().last_error = Some(e.to_string());
                    self.events.publish(SystemEvent::SessionError {
                        room_id: self.config.room_id.clone(),
                        message: e.to_string(),
                    });
                    self.teardown(peer).await;
                    break;
                }
            }
        }

        self.set_state(SessionState::Closed, attempt);
        info!(room_id = %self.config.room_id, "Stream session closed");
    }

    /// One offer/answer exchange, returning when the peer fails or the
    /// session is stopped
    ///
    /// The created peer is left in `peer_slot` for the caller to tear down.
    async fn negotiate(
        &self,
        attempt: u64,
        peer_slot: &mut Option<Arc<dyn PeerHandle>>,
    ) -> Result<Exit> {
        let room_id = self.config.room_id.as_str();
        let device_id = self.config.device_id.as_str();
        let cancel = self.cancel.clone();

        if cancel.is_cancelled() {
            return Ok(Exit::Stopped);
        }
        self.set_state(SessionState::Offering, attempt);

        let peer = self.factory.create().await?;
        *peer_slot = Some(peer.clone());
        let mut peer_state = peer.state_watch();
        let mut local_candidates = peer.take_local_candidates();

        self.signaling.create_room(room_id).await?;
        // Subscribe before writing the offer so a fast answer is not missed
        let mut answers = self.signaling.subscribe_answer(room_id).await?;
        let mut remote_candidates = self
            .signaling
            .subscribe_ice_candidates(room_id, device_id)
            .await?;

        let offer = peer.create_offer().await?;
        self.signaling.write_offer(room_id, &offer, device_id).await?;
        self.set_state(SessionState::AwaitingAnswer, attempt);

        let mut answered = false;
        // Remote candidates that arrived before the answer was applied
        let mut pending: Vec<IceCandidate> = Vec::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(Exit::Stopped),

                answer = answers.recv(), if !answered => {
                    let Some(answer) = answer else {
                        return Err(AppError::StoreUnavailable("answer subscription ended".to_string()));
                    };
                    debug!(room_id, attempt, from = %answer.from, "Applying answer");
                    peer.apply_answer(&answer.sdp).await?;
                    answered = true;

                    if !pending.is_empty() {
                        debug!(room_id, attempt, "Replaying {} buffered candidates", pending.len());
                    }
                    for candidate in pending.drain(..) {
                        self.apply_candidate(peer.as_ref(), candidate, attempt).await;
                    }
                }

                candidate = remote_candidates.recv() => {
                    let Some(candidate) = candidate else {
                        return Err(AppError::StoreUnavailable("candidate subscription ended".to_string()));
                    };
                    if answered {
                        self.apply_candidate(peer.as_ref(), candidate, attempt).await;
                    } else {
                        pending.push(candidate);
                    }
                }

                candidate = next_local(&mut local_candidates) => match candidate {
                    Some(candidate) => {
                        if let Err(e) = self.signaling.add_ice_candidate(room_id, &candidate, device_id).await {
                            warn!(room_id, device_id, attempt, "Failed to publish local candidate: {}", e);
                        }
                    }
                    None => local_candidates = None,
                },

                changed = peer_state.changed() => {
                    if changed.is_err() {
                        return Err(AppError::PeerConnectionError("peer state channel closed".to_string()));
                    }
                    let state = *peer_state.borrow_and_update();
                    debug!(room_id, attempt, "Peer state: {}", state);
                    match state {
                        PeerState::Connected => self.set_state(SessionState::Connected, attempt),
                        PeerState::Failed => {
                            warn!(room_id, device_id, attempt, "Peer connection failed");
                            self.set_state(SessionState::Failed, attempt);
                            return Ok(Exit::PeerFailed);
                        }
                        PeerState::Closed => {
                            return Err(AppError::PeerConnectionError("peer connection closed".to_string()));
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    async fn apply_candidate(&self, peer: &dyn PeerHandle, candidate: IceCandidate, attempt: u64) {
        if let Err(e) = peer.add_ice_candidate(candidate).await {
            warn!(
                room_id = %self.config.room_id,
                attempt,
                "Failed to apply remote candidate: {}",
                e
            );
        }
    }

    /// Close the peer and its track, then clean up the room
    ///
    /// Each step is bounded by [`TEARDOWN_TIMEOUT`] so a dead store cannot
    /// hold up shutdown.
    async fn teardown(&self, peer: Option<Arc<dyn PeerHandle>>) {
        let room_id = self.config.room_id.as_str();
        if let Some(peer) = peer {
            match tokio::time::timeout(TEARDOWN_TIMEOUT, peer.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(room_id, "Failed to close peer: {}", e),
                Err(_) => warn!(room_id, "Timed out closing peer"),
            }
        }
        match tokio::time::timeout(TEARDOWN_TIMEOUT, self.signaling.cleanup_room(room_id)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(room_id, "Failed to clean up room: {}", e),
            Err(_) => warn!(room_id, "Timed out cleaning up room after {:?}", TEARDOWN_TIMEOUT),
        }
    }

    fn set_state(&self, state: SessionState, attempt: u64) {
        let previous = self.state.send_replace(state);
        if previous == state {
            return;
        }
        debug!(room_id = %self.config.room_id, attempt, "Session {} -> {}", previous, state);
        self.events.publish(SystemEvent::SessionStateChanged {
            room_id: self.config.room_id.clone(),
            state: state.to_string(),
            attempt,
        });
    }
}

/// Pending forever once the receiver is gone
async fn next_local(rx: &mut Option<mpsc::Receiver<IceCandidate>>) -> Option<IceCandidate> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
