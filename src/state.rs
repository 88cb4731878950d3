use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::info;

use crate::config::ConfigStore;
use crate::control::ControlRelay;
use crate::events::EventBus;
use crate::signaling::SignalingClient;
use crate::video::TimeBase;
use crate::webrtc::{PeerFactory, SessionConfig, SessionInfo, SessionState, StreamSession};

/// Application-wide state shared across handlers
///
/// Handlers never touch process globals: the control state lives in
/// `control`, the sender session in `session`.
pub struct AppState {
    /// Configuration store
    pub config: ConfigStore,
    /// Signaling client shared by the sender session and the viewer routes
    pub signaling: Arc<SignalingClient>,
    /// Control relay
    pub control: Arc<ControlRelay>,
    /// Camera sender session (None when the sender is disabled)
    session: RwLock<Option<Arc<StreamSession>>>,
    /// Event bus for real-time notifications
    pub events: Arc<EventBus>,
    /// Shared origin for video timestamps
    pub time_base: TimeBase,
    /// Shutdown signal sender
    pub shutdown_tx: broadcast::Sender<()>,
}

impl AppState {
    pub fn new(
        config: ConfigStore,
        signaling: Arc<SignalingClient>,
        control: Arc<ControlRelay>,
        events: Arc<EventBus>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            signaling,
            control,
            session: RwLock::new(None),
            events,
            time_base: TimeBase::new(),
            shutdown_tx,
        })
    }

    /// Subscribe to shutdown signal
    ///
    /// WebSocket connections outlive the HTTP server future and close
    /// themselves when this fires.
    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Start the camera sender, replacing (and stopping) any running session
    pub async fn start_sender(&self, factory: Arc<dyn PeerFactory>) -> Arc<StreamSession> {
        let config = SessionConfig::from_webrtc(&self.config.get().webrtc);
        let mut slot = self.session.write().await;
        if let Some(previous) = slot.take() {
            info!("Replacing running sender session");
            previous.stop().await;
        }

        let session = Arc::new(StreamSession::start(
            config,
            self.signaling.clone(),
            factory,
            self.events.clone(),
        ));
        *slot = Some(session.clone());
        session
    }

    pub async fn session(&self) -> Option<Arc<StreamSession>> {
        self.session.read().await.clone()
    }

    /// Session status, reported as `idle` when no sender runs
    pub async fn session_info(&self) -> SessionInfo {
        match self.session().await {
            Some(session) => session.info(),
            None => SessionInfo {
                state: SessionState::Idle,
                room_id: self.config.get().webrtc.room_id.clone(),
                attempt: 0,
                last_error: None,
            },
        }
    }

    /// Stop the sender session if one is running. Idempotent.
    pub async fn stop_sender(&self) {
        let session = self.session.read().await.clone();
        if let Some(session) = session {
            session.stop().await;
        }
    }
}
