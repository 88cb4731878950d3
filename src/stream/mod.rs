//! Multipart JPEG streaming for the test-mode preview

pub mod mjpeg;

pub use mjpeg::{create_mjpeg_part, spawn_test_pattern_stream};
