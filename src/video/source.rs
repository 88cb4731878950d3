//! Video source abstraction
//!
//! A source yields an endless sequence of RGB24 frames with strictly
//! increasing presentation timestamps. Sources are single-use: once closed
//! (or failed) they do not restart.

use async_trait::async_trait;

use super::camera::CameraSource;
use super::format::Resolution;
use super::frame::{TimeBase, VideoFrame};
use super::synthetic::SyntheticSource;
use crate::config::{VideoConfig, VideoSourceKind};
use crate::error::{AppError, Result};

#[async_trait]
pub trait VideoSource: Send {
    /// Source name for logs
    fn name(&self) -> &'static str;

    fn resolution(&self) -> Resolution;

    fn fps(&self) -> u32;

    /// Wait for and return the next frame
    ///
    /// Errors are final; the caller should close the source.
    async fn next_frame(&mut self) -> Result<VideoFrame>;

    /// Release the underlying device. Safe to call more than once.
    async fn close(&mut self);
}

/// Open the source selected by configuration
pub async fn open_source(config: &VideoConfig, time_base: TimeBase) -> Result<Box<dyn VideoSource>> {
    let resolution = Resolution::new(config.width, config.height);
    if !resolution.is_valid() {
        return Err(AppError::Config(format!("Unsupported resolution {}", resolution)));
    }
    let fps = config.fps.clamp(1, 60);

    match config.source {
        VideoSourceKind::Test => Ok(Box::new(SyntheticSource::new(resolution, fps, time_base))),
        VideoSourceKind::Camera => {
            let camera = CameraSource::open(&config.device, resolution, fps, time_base).await?;
            Ok(Box::new(camera))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_test_source() {
        let config = VideoConfig {
            width: 64,
            height: 48,
            fps: 60,
            ..Default::default()
        };
        let mut source = open_source(&config, TimeBase::new()).await.unwrap();
        assert_eq!(source.name(), "synthetic");
        assert_eq!(source.resolution(), Resolution::new(64, 48));

        let frame = source.next_frame().await.unwrap();
        assert_eq!(frame.data().len(), 64 * 48 * 3);
        source.close().await;
    }

    #[tokio::test]
    async fn test_invalid_resolution() {
        let config = VideoConfig {
            width: 641,
            ..Default::default()
        };
        assert!(open_source(&config, TimeBase::new()).await.is_err());
    }
}
