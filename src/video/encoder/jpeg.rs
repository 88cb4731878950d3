//! JPEG encoder
//!
//! RGB24 is converted to I420 first, then turbojpeg compresses the planar
//! image directly, skipping its own color conversion.

use bytes::Bytes;

use crate::error::{AppError, Result};
use crate::video::convert::rgb24_to_i420;
use crate::video::format::Resolution;
use crate::video::frame::VideoFrame;

/// JPEG encoder using turbojpeg
///
/// Not thread-safe; keep one per producer.
pub struct JpegEncoder {
    resolution: Resolution,
    compressor: turbojpeg::Compressor,
    i420_buffer: Vec<u8>,
}

impl JpegEncoder {
    pub fn new(resolution: Resolution, quality: u32) -> Result<Self> {
        let mut compressor = turbojpeg::Compressor::new().map_err(|e| {
            AppError::VideoError(format!("Failed to create turbojpeg compressor: {}", e))
        })?;

        compressor
            .set_quality(quality.clamp(1, 100) as i32)
            .map_err(|e| AppError::VideoError(format!("Failed to set JPEG quality: {}", e)))?;

        Ok(Self {
            resolution,
            compressor,
            i420_buffer: Vec::with_capacity(resolution.i420_len()),
        })
    }

    /// Encode one RGB24 frame
    pub fn encode(&mut self, frame: &VideoFrame) -> Result<Bytes> {
        if frame.resolution != self.resolution {
            return Err(AppError::VideoError(format!(
                "Frame is {}, encoder expects {}",
                frame.resolution, self.resolution
            )));
        }

        rgb24_to_i420(frame.data(), self.resolution, &mut self.i420_buffer)?;

        let yuv_image = turbojpeg::YuvImage {
            pixels: self.i420_buffer.as_slice(),
            width: self.resolution.width as usize,
            height: self.resolution.height as usize,
            align: 1,
            subsamp: turbojpeg::Subsamp::Sub2x2,
        };

        let jpeg = self
            .compressor
            .compress_yuv_to_vec(yuv_image)
            .map_err(|e| AppError::VideoError(format!("JPEG compression failed: {}", e)))?;

        Ok(Bytes::from(jpeg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::synthetic::render_test_pattern;
    use std::time::Duration;

    #[test]
    fn test_encode_produces_jpeg() {
        let res = Resolution::new(64, 48);
        let frame = VideoFrame::new(
            Bytes::from(render_test_pattern(res, 3)),
            res,
            3,
            Duration::ZERO,
        );

        let mut encoder = JpegEncoder::new(res, 80).unwrap();
        let jpeg = encoder.encode(&frame).unwrap();

        // SOI and EOI markers
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);
    }

    #[test]
    fn test_resolution_mismatch() {
        let mut encoder = JpegEncoder::new(Resolution::new(64, 48), 80).unwrap();
        let frame = VideoFrame::new(
            Bytes::from(vec![0u8; 32 * 32 * 3]),
            Resolution::new(32, 32),
            0,
            Duration::ZERO,
        );
        assert!(encoder.encode(&frame).is_err());
    }
}
