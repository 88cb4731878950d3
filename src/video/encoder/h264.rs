//! H264 software encoder (OpenH264)
//!
//! The encoder handle is not `Send`, so it lives on a dedicated thread.
//! [`spawn_encoder_thread`] wires that thread between two channels.

use openh264::encoder::{Encoder, FrameType};
use openh264::formats::YUVBuffer;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{AppError, Result};
use crate::video::convert::rgb24_to_i420;
use crate::video::format::Resolution;
use crate::video::frame::VideoFrame;

/// One encoded access unit in Annex B format
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub data: Vec<u8>,
    pub key_frame: bool,
    pub sequence: u64,
    pub pts: Duration,
}

pub struct H264Encoder {
    encoder: Encoder,
    resolution: Resolution,
    i420_buffer: Vec<u8>,
    frame_count: u64,
    keyframe_interval: u64,
}

impl H264Encoder {
    /// `keyframe_interval` forces an IDR every N frames (0 disables)
    pub fn new(resolution: Resolution, keyframe_interval: u64) -> Result<Self> {
        let encoder = Encoder::new()
            .map_err(|e| AppError::VideoError(format!("Failed to create H264 encoder: {}", e)))?;

        Ok(Self {
            encoder,
            resolution,
            i420_buffer: Vec::with_capacity(resolution.i420_len()),
            frame_count: 0,
            keyframe_interval,
        })
    }

    pub fn encode(&mut self, frame: &VideoFrame) -> Result<EncodedFrame> {
        if frame.resolution != self.resolution {
            return Err(AppError::VideoError(format!(
                "Frame is {}, encoder expects {}",
                frame.resolution, self.resolution
            )));
        }

        if self.keyframe_interval > 0
            && self.frame_count > 0
            && self.frame_count % self.keyframe_interval == 0
        {
            self.encoder.force_intra_frame();
        }

        rgb24_to_i420(frame.data(), self.resolution, &mut self.i420_buffer)?;
        let yuv = YUVBuffer::from_vec(
            self.i420_buffer.clone(),
            self.resolution.width as usize,
            self.resolution.height as usize,
        );

        let bitstream = self
            .encoder
            .encode(&yuv)
            .map_err(|e| AppError::VideoError(format!("H264 encoding failed: {}", e)))?;
        self.frame_count += 1;

        Ok(EncodedFrame {
            key_frame: matches!(bitstream.frame_type(), FrameType::IDR | FrameType::I),
            data: bitstream.to_vec(),
            sequence: frame.sequence,
            pts: frame.pts,
        })
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }
}

/// Run an [`H264Encoder`] on its own thread
///
/// Raw frames go in through the returned sender; encoded frames come out of
/// the returned receiver. The thread exits when the sender is dropped or the
/// receiver is closed.
pub fn spawn_encoder_thread(
    resolution: Resolution,
    keyframe_interval: u64,
) -> Result<(
    mpsc::Sender<VideoFrame>,
    mpsc::Receiver<EncodedFrame>,
    JoinHandle<()>,
)> {
    let (raw_tx, mut raw_rx) = mpsc::channel::<VideoFrame>(2);
    let (out_tx, out_rx) = mpsc::channel::<EncodedFrame>(4);

    let handle = std::thread::Builder::new()
        .name("h264-encoder".to_string())
        .spawn(move || {
            let mut encoder = match H264Encoder::new(resolution, keyframe_interval) {
                Ok(encoder) => encoder,
                Err(e) => {
                    warn!("{}", e);
                    return;
                }
            };
            while let Some(frame) = raw_rx.blocking_recv() {
                match encoder.encode(&frame) {
                    Ok(encoded) if encoded.data.is_empty() => {}
                    Ok(encoded) => {
                        if out_tx.blocking_send(encoded).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Dropping frame {}: {}", frame.sequence, e),
                }
            }
            debug!("H264 encoder thread exiting after {} frames", encoder.frame_count());
        })
        .map_err(|e| AppError::VideoError(format!("Failed to spawn encoder thread: {}", e)))?;

    Ok((raw_tx, out_rx, handle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::synthetic::render_test_pattern;
    use bytes::Bytes;

    fn frame(res: Resolution, n: u64) -> VideoFrame {
        VideoFrame::new(
            Bytes::from(render_test_pattern(res, n)),
            res,
            n,
            Duration::from_millis(n * 33),
        )
    }

    #[test]
    fn test_first_frame_is_keyframe() {
        let res = Resolution::new(64, 48);
        let mut encoder = H264Encoder::new(res, 30).unwrap();

        let first = encoder.encode(&frame(res, 0)).unwrap();
        assert!(first.key_frame);
        // Annex B start code
        assert!(first.data.starts_with(&[0, 0, 0, 1]) || first.data.starts_with(&[0, 0, 1]));
    }

    #[tokio::test]
    async fn test_encoder_thread() {
        let res = Resolution::new(64, 48);
        let (tx, mut rx, handle) = spawn_encoder_thread(res, 10).unwrap();

        tx.send(frame(res, 0)).await.unwrap();
        let encoded = rx.recv().await.unwrap();
        assert_eq!(encoded.sequence, 0);
        assert!(encoded.key_frame);

        drop(tx);
        assert!(rx.recv().await.is_none());
        tokio::task::spawn_blocking(move || handle.join().unwrap())
            .await
            .unwrap();
    }
}
