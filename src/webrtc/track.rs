//! Outbound H264 video track
//!
//! ```text
//! VideoSource --(RGB24)--> h264-encoder thread --(Annex B)--> TrackLocalStaticSample
//! ```
//!
//! The pump only opens the video source once the peer reports `Connected`,
//! so a camera is not held while negotiation is pending.

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use super::peer::PeerState;
use crate::config::VideoConfig;
use crate::utils::LogThrottler;
use crate::video::encoder::spawn_encoder_thread;
use crate::video::{open_source, TimeBase, VideoSource};

const H264_MIME_TYPE: &str = "video/H264";
const H264_CLOCK_RATE: u32 = 90000;
/// Constrained baseline, the profile OpenH264 produces
const H264_FMTP: &str = "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f";

/// Seconds of frames between forced keyframes
const KEYFRAME_INTERVAL_SECS: u64 = 2;

pub struct VideoTrack {
    track: Arc<TrackLocalStaticSample>,
    cancel: CancellationToken,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl VideoTrack {
    pub fn new(track_id: &str, stream_id: &str) -> Self {
        let codec = RTCRtpCodecCapability {
            mime_type: H264_MIME_TYPE.to_string(),
            clock_rate: H264_CLOCK_RATE,
            channels: 0,
            sdp_fmtp_line: H264_FMTP.to_string(),
            rtcp_feedback: vec![],
        };

        Self {
            track: Arc::new(TrackLocalStaticSample::new(
                codec,
                track_id.to_string(),
                stream_id.to_string(),
            )),
            cancel: CancellationToken::new(),
            pump: Mutex::new(None),
        }
    }

    /// Track handle to add to a peer connection
    pub fn track_local(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        self.track.clone()
    }

    /// Start the frame pump
    ///
    /// Frames flow once `peer_state` reaches `Connected`. Calling this on a
    /// running or stopped track does nothing.
    pub fn start(&self, video: VideoConfig, time_base: TimeBase, peer_state: watch::Receiver<PeerState>) {
        let mut pump = self.pump.lock();
        if pump.is_some() || self.cancel.is_cancelled() {
            return;
        }

        let track = self.track.clone();
        let cancel = self.cancel.clone();
        *pump = Some(tokio::spawn(async move {
            if !wait_connected(peer_state, &cancel).await {
                debug!("Video pump exiting before connection");
                return;
            }
            run_pump(track, video, time_base, cancel).await;
        }));
    }

    /// Stop the pump and wait for the video source to be released
    pub async fn stop(&self) {
        self.cancel.cancel();
        let pump = self.pump.lock().take();
        if let Some(pump) = pump {
            if let Err(e) = pump.await {
                warn!("Video pump task failed: {}", e);
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for VideoTrack {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Returns false if cancelled or the peer closed first
async fn wait_connected(mut state: watch::Receiver<PeerState>, cancel: &CancellationToken) -> bool {
    loop {
        match *state.borrow_and_update() {
            PeerState::Connected => return true,
            PeerState::Failed | PeerState::Closed => return false,
            _ => {}
        }
        tokio::select! {
            _ = cancel.cancelled() => return false,
            changed = state.changed() => {
                if changed.is_err() {
                    return false;
                }
            }
        }
    }
}

async fn run_pump(
    track: Arc<TrackLocalStaticSample>,
    video: VideoConfig,
    time_base: TimeBase,
    cancel: CancellationToken,
) {
    let mut source = match open_source(&video, time_base).await {
        Ok(source) => source,
        Err(e) => {
            warn!("Failed to open video source: {}", e);
            return;
        }
    };

    let resolution = source.resolution();
    let fps = source.fps();
    let frame_duration = Duration::from_secs_f64(1.0 / fps as f64);

    let (raw_tx, mut encoded_rx, encoder_thread) =
        match spawn_encoder_thread(resolution, fps as u64 * KEYFRAME_INTERVAL_SECS) {
            Ok(parts) => parts,
            Err(e) => {
                warn!("{}", e);
                source.close().await;
                return;
            }
        };

    info!(
        "Video pump started: {} {} @ {}fps",
        source.name(),
        resolution,
        fps
    );

    let throttler = LogThrottler::with_secs(5);
    let mut frames_sent = 0u64;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            frame = source.next_frame() => match frame {
                Ok(frame) => {
                    // Encoder busy: drop rather than queue latency
                    if raw_tx.try_send(frame).is_err() {
                        trace!("Encoder busy, dropping frame");
                    }
                }
                Err(e) => {
                    warn!("Video source stopped: {}", e);
                    break;
                }
            },
            encoded = encoded_rx.recv() => {
                let Some(encoded) = encoded else {
                    warn!("H264 encoder stopped");
                    break;
                };
                let sample = Sample {
                    data: Bytes::from(encoded.data),
                    duration: frame_duration,
                    ..Default::default()
                };
                if let Err(e) = track.write_sample(&sample).await {
                    if throttler.should_log("write_sample") {
                        debug!("write_sample failed: {}", e);
                    }
                } else {
                    frames_sent += 1;
                }
            }
        }
    }

    drop(raw_tx);
    drop(encoded_rx);
    source.close().await;
    if let Err(e) = tokio::task::spawn_blocking(move || encoder_thread.join()).await {
        warn!("Failed to join encoder thread: {}", e);
    }
    info!("Video pump stopped after {} frames", frames_sent);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_video() -> VideoConfig {
        VideoConfig {
            width: 64,
            height: 48,
            fps: 10,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_stop_before_connect() {
        let (_state_tx, state_rx) = watch::channel(PeerState::New);
        let track = VideoTrack::new("video0", "rover");
        track.start(small_video(), TimeBase::new(), state_rx);

        track.stop().await;
        assert!(track.is_stopped());
        assert!(track.pump.lock().is_none());
        // Second stop is a no-op
        track.stop().await;
    }

    #[tokio::test]
    async fn test_pump_runs_when_connected_and_stops() {
        let (state_tx, state_rx) = watch::channel(PeerState::New);
        let track = VideoTrack::new("video0", "rover");
        track.start(small_video(), TimeBase::new(), state_rx);

        state_tx.send(PeerState::Connected).unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;

        tokio::time::timeout(Duration::from_secs(5), track.stop())
            .await
            .unwrap();
        assert!(track.is_stopped());
    }

    #[tokio::test]
    async fn test_start_after_stop_is_ignored() {
        let (_state_tx, state_rx) = watch::channel(PeerState::Connected);
        let track = VideoTrack::new("video0", "rover");
        track.stop().await;
        track.start(small_video(), TimeBase::new(), state_rx);
        assert!(track.pump.lock().is_none());
    }
}
