//! WebRTC sender
//!
//! Architecture:
//! ```text
//! VideoSource (test pattern / V4L2)
//!        |
//!        v
//! VideoTrack (OpenH264 -> TrackLocalStaticSample)
//!        |
//!        v
//! WebRtcPeer  <---- StreamSession ----> SignalingClient <----> document store
//!        |                                                          ^
//! Browser <-------------- media ------------------------------------|-- dashboard
//! ```

pub mod config;
pub mod peer;
pub mod session;
pub mod track;

pub use config::ice_servers;
pub use peer::{PeerFactory, PeerHandle, PeerState, WebRtcPeer, WebRtcPeerFactory};
pub use session::{SessionConfig, SessionInfo, SessionState, StreamSession};
pub use track::VideoTrack;
