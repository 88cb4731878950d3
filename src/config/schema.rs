use serde::{Deserialize, Serialize};
use typeshare::typeshare;

/// Main application configuration
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Web server settings
    pub web: WebConfig,
    /// Video source settings
    pub video: VideoConfig,
    /// WebRTC and room settings
    pub webrtc: WebRtcConfig,
    /// Signaling store backend settings
    pub signaling: SignalingConfig,
    /// Control safety thresholds
    pub safety: SafetyConfig,
    /// In-process camera sender
    pub sender: SenderConfig,
}

/// Web server configuration
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WebConfig {
    /// Bind address
    pub bind_address: String,
    /// HTTP listen port
    pub http_port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            http_port: 5000,
        }
    }
}

/// Where video frames come from
#[typeshare]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum VideoSourceKind {
    /// Synthetic test pattern, no hardware required
    #[default]
    Test,
    /// V4L2 camera device
    Camera,
}

/// Video source configuration
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VideoConfig {
    /// Frame source
    pub source: VideoSourceKind,
    /// Camera device path (e.g., /dev/video0)
    pub device: String,
    /// Resolution width
    pub width: u32,
    /// Resolution height
    pub height: u32,
    /// Frame rate
    pub fps: u32,
    /// JPEG quality for /video_feed (1-100)
    pub jpeg_quality: u32,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            source: VideoSourceKind::Test,
            device: "/dev/video0".to_string(),
            width: 640,
            height: 480,
            fps: 30,
            jpeg_quality: 80,
        }
    }
}

impl VideoConfig {
    pub fn is_test_mode(&self) -> bool {
        self.source == VideoSourceKind::Test
    }
}

/// WebRTC configuration
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WebRtcConfig {
    /// STUN/TURN server URLs
    pub ice_servers: Vec<String>,
    /// Signaling room shared by sender and viewer
    pub room_id: String,
    /// Device id of the camera sender
    pub sender_device_id: String,
    /// Device id of the dashboard viewer
    pub viewer_device_id: String,
    /// Delay before rebuilding a failed connection
    pub reconnect_delay_secs: u64,
    /// Declared for parity with deployed configs; answers are awaited without a timeout
    pub connection_timeout_secs: u64,
    /// Declared for parity with deployed configs; reconnects are not bounded
    pub max_reconnect_attempts: u32,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
                "stun:stun2.l.google.com:19302".to_string(),
                "stun:stun3.l.google.com:19302".to_string(),
                "stun:stun4.l.google.com:19302".to_string(),
            ],
            room_id: "rpi_car_stream".to_string(),
            sender_device_id: "rpi_car_camera".to_string(),
            viewer_device_id: "dashboard_viewer".to_string(),
            reconnect_delay_secs: 5,
            connection_timeout_secs: 30,
            max_reconnect_attempts: 3,
        }
    }
}

/// Signaling backend type
#[typeshare]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SignalingBackend {
    /// Process-local document store
    #[default]
    Memory,
    /// Google Cloud Firestore over REST
    Firestore,
}

/// Signaling store configuration
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SignalingConfig {
    /// Store backend
    pub backend: SignalingBackend,
    /// Credentials JSON file (must carry `project_id` and `access_token`)
    pub credentials_path: Option<String>,
    /// Firestore project id (overrides the credentials file)
    pub project_id: Option<String>,
    /// Firestore emulator host:port, disables auth when set
    pub emulator_host: Option<String>,
    /// Top-level collection holding room documents
    pub collection: String,
    /// Poll interval for backends without push notifications
    pub poll_interval_ms: u64,
    /// Buffered events per subscription
    pub channel_capacity: usize,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            backend: SignalingBackend::Memory,
            credentials_path: None,
            project_id: None,
            emulator_host: None,
            collection: "webrtc_signaling".to_string(),
            poll_interval_ms: 500,
            channel_capacity: 32,
        }
    }
}

/// Control safety thresholds
///
/// Carried in the configuration surface but not enforced by the control relay.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SafetyConfig {
    pub auto_stop_enabled: bool,
    pub auto_stop_timeout_secs: u64,
    /// Commands per second
    pub max_command_rate: u32,
    pub joystick_deadzone: u32,
    pub joystick_sensitivity: f64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            auto_stop_enabled: true,
            auto_stop_timeout_secs: 5,
            max_command_rate: 50,
            joystick_deadzone: 20,
            joystick_sensitivity: 1.0,
        }
    }
}

/// In-process camera sender configuration
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SenderConfig {
    /// Run the sender lifecycle manager inside this process
    pub enabled: bool,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.web.http_port, 5000);
        assert_eq!(config.video.width, 640);
        assert_eq!(config.video.height, 480);
        assert!(config.video.is_test_mode());
        assert_eq!(config.webrtc.room_id, "rpi_car_stream");
        assert_eq!(config.webrtc.reconnect_delay_secs, 5);
        assert_eq!(config.webrtc.max_reconnect_attempts, 3);
        assert_eq!(config.signaling.collection, "webrtc_signaling");
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{"video":{"source":"camera","fps":15},"signaling":{"backend":"firestore"}}"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.video.source, VideoSourceKind::Camera);
        assert_eq!(config.video.fps, 15);
        assert_eq!(config.video.width, 640);
        assert_eq!(config.signaling.backend, SignalingBackend::Firestore);
        assert_eq!(config.signaling.poll_interval_ms, 500);
        assert!(config.sender.enabled);
    }
}
