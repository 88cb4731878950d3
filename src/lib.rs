//! rover-dash - camera rover dashboard
//!
//! Streams a camera (or a synthetic test pattern) to a browser over WebRTC,
//! with offers, answers and ICE candidates relayed through a shared document
//! store, and relays drive, joystick and servo commands back to the rover.

pub mod config;
pub mod control;
pub mod error;
pub mod events;
pub mod signaling;
pub mod state;
pub mod stream;
pub mod utils;
pub mod video;
pub mod web;
pub mod webrtc;

pub use error::{AppError, Result};
