//! Frame encoders

pub mod h264;
pub mod jpeg;

pub use h264::{spawn_encoder_thread, EncodedFrame, H264Encoder};
pub use jpeg::JpegEncoder;
