//! Video sources and encoders
//!
//! A [`VideoSource`] yields packed RGB24 frames stamped on a shared
//! [`TimeBase`]. Encoders turn them into H264 for WebRTC tracks or JPEG for
//! the MJPEG preview.

pub mod camera;
pub mod convert;
pub mod encoder;
pub mod format;
pub mod frame;
pub mod source;
pub mod synthetic;

pub use camera::CameraSource;
pub use encoder::{EncodedFrame, H264Encoder, JpegEncoder};
pub use format::Resolution;
pub use frame::{PtsClock, TimeBase, VideoFrame};
pub use source::{open_source, VideoSource};
pub use synthetic::{render_test_pattern, SyntheticSource};
