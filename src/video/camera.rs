//! V4L2 camera source
//!
//! Capture runs on a dedicated blocking thread that owns the device and its
//! mmap buffers. YUYV frames are converted to RGB24 there and handed to the
//! async side through a small bounded channel.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::format::Resolution;
use super::frame::{PtsClock, TimeBase, VideoFrame};
use super::source::VideoSource;
use crate::error::{AppError, Result};

/// Frames buffered between the capture thread and the consumer
const FRAME_QUEUE: usize = 2;

pub struct CameraSource {
    device: String,
    resolution: Resolution,
    fps: u32,
    frames: mpsc::Receiver<Result<Vec<u8>>>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    clock: PtsClock,
    sequence: u64,
}

impl CameraSource {
    /// Open the device and start capturing
    ///
    /// Resolves once the device is streaming, or fails with `CaptureError`.
    pub async fn open(
        device: &str,
        resolution: Resolution,
        fps: u32,
        time_base: TimeBase,
    ) -> Result<Self> {
        let (init_tx, init_rx) = tokio::sync::oneshot::channel();
        let (frame_tx, frames) = mpsc::channel(FRAME_QUEUE);
        let stop = Arc::new(AtomicBool::new(false));

        let thread = {
            let device = device.to_string();
            let stop = stop.clone();
            std::thread::Builder::new()
                .name("camera-capture".to_string())
                .spawn(move || capture::run(device, resolution, fps, stop, init_tx, frame_tx))
                .map_err(|e| AppError::CaptureError(format!("Failed to spawn capture thread: {}", e)))?
        };

        let actual = match init_rx.await {
            Ok(Ok(actual)) => actual,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(AppError::CaptureError(format!(
                    "Capture thread for {} exited during setup",
                    device
                )));
            }
        };

        info!("Camera {} streaming at {} @ {}fps", device, actual, fps);

        Ok(Self {
            device: device.to_string(),
            resolution: actual,
            fps,
            frames,
            stop,
            thread: Some(thread),
            clock: PtsClock::new(time_base),
            sequence: 0,
        })
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.frames.close();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Capture thread for {} panicked", self.device);
            }
        }
    }
}

#[async_trait]
impl VideoSource for CameraSource {
    fn name(&self) -> &'static str {
        "camera"
    }

    fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn fps(&self) -> u32 {
        self.fps
    }

    async fn next_frame(&mut self) -> Result<VideoFrame> {
        let data = self.frames.recv().await.ok_or_else(|| {
            AppError::CaptureError(format!("Camera {} is no longer streaming", self.device))
        })??;

        let frame = VideoFrame::new(
            Bytes::from(data),
            self.resolution,
            self.sequence,
            self.clock.stamp(),
        );
        self.sequence += 1;
        Ok(frame)
    }

    async fn close(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.stop.store(true, Ordering::SeqCst);
        self.frames.close();
        // The capture thread notices within one dequeue
        match tokio::task::spawn_blocking(move || thread.join()).await {
            Ok(Ok(())) => info!("Camera {} released", self.device),
            _ => warn!("Capture thread for {} did not exit cleanly", self.device),
        }
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(feature = "camera")]
mod capture {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio::sync::{mpsc, oneshot};
    use tracing::warn;
    use v4l::buffer::Type;
    use v4l::io::mmap::Stream;
    use v4l::io::traits::CaptureStream;
    use v4l::video::capture::Parameters;
    use v4l::video::Capture;
    use v4l::{Device, FourCC};

    use crate::error::{AppError, Result};
    use crate::video::convert::yuyv_to_rgb24;
    use crate::video::format::Resolution;

    const BUFFER_COUNT: u32 = 4;

    pub(super) fn run(
        path: String,
        requested: Resolution,
        fps: u32,
        stop: Arc<AtomicBool>,
        init_tx: oneshot::Sender<Result<Resolution>>,
        frame_tx: mpsc::Sender<Result<Vec<u8>>>,
    ) {
        let capture_err = |what: &str, e: std::io::Error| {
            AppError::CaptureError(format!("{} on {}: {}", what, path, e))
        };

        let mut device = match Device::with_path(&path) {
            Ok(device) => device,
            Err(e) => {
                let _ = init_tx.send(Err(capture_err("Cannot open camera", e)));
                return;
            }
        };

        let yuyv = FourCC::new(b"YUYV");
        let format = match device.format().and_then(|mut fmt| {
            fmt.width = requested.width;
            fmt.height = requested.height;
            fmt.fourcc = yuyv;
            device.set_format(&fmt)
        }) {
            Ok(format) => format,
            Err(e) => {
                let _ = init_tx.send(Err(capture_err("Cannot set format", e)));
                return;
            }
        };
        if format.fourcc != yuyv {
            let _ = init_tx.send(Err(AppError::CaptureError(format!(
                "Camera {} does not support YUYV (got {})",
                path, format.fourcc
            ))));
            return;
        }
        if let Err(e) = device.set_params(&Parameters::with_fps(fps)) {
            warn!("Camera {} rejected {}fps: {}", path, fps, e);
        }

        let actual = Resolution::new(format.width, format.height);
        let mut stream = match Stream::with_buffers(&mut device, Type::VideoCapture, BUFFER_COUNT) {
            Ok(stream) => stream,
            Err(e) => {
                let _ = init_tx.send(Err(capture_err("Cannot start streaming", e)));
                return;
            }
        };

        if init_tx.send(Ok(actual)).is_err() {
            return;
        }

        let mut rgb = Vec::with_capacity(actual.rgb24_len());
        while !stop.load(Ordering::SeqCst) {
            let result = match stream.next() {
                Ok((buf, _meta)) => {
                    yuyv_to_rgb24(buf, actual, &mut rgb).map(|_| std::mem::take(&mut rgb))
                }
                Err(e) => Err(capture_err("Capture read failed", e)),
            };
            let failed = result.is_err();
            if frame_tx.blocking_send(result).is_err() || failed {
                break;
            }
            rgb = Vec::with_capacity(actual.rgb24_len());
        }
    }
}

#[cfg(not(feature = "camera"))]
mod capture {
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use tokio::sync::{mpsc, oneshot};

    use crate::error::{AppError, Result};
    use crate::video::format::Resolution;

    pub(super) fn run(
        path: String,
        _requested: Resolution,
        _fps: u32,
        _stop: Arc<AtomicBool>,
        init_tx: oneshot::Sender<Result<Resolution>>,
        _frame_tx: mpsc::Sender<Result<Vec<u8>>>,
    ) {
        let _ = init_tx.send(Err(AppError::CaptureError(format!(
            "Cannot open {}: camera support not compiled in (enable the `camera` feature)",
            path
        ))));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(feature = "camera"))]
    #[tokio::test]
    async fn test_open_without_camera_support() {
        let result =
            CameraSource::open("/dev/video0", Resolution::VGA, 30, TimeBase::new()).await;
        assert!(matches!(result, Err(AppError::CaptureError(_))));
    }

    #[cfg(feature = "camera")]
    #[tokio::test]
    async fn test_open_missing_device() {
        let result = CameraSource::open(
            "/dev/does-not-exist",
            Resolution::VGA,
            30,
            TimeBase::new(),
        )
        .await;
        assert!(matches!(result, Err(AppError::CaptureError(_))));
    }
}
