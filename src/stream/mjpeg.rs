//! MJPEG preview stream
//!
//! Renders the synthetic test pattern, JPEG-encodes each frame and frames it
//! as one part of a `multipart/x-mixed-replace` response.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::VideoConfig;
use crate::error::{AppError, Result};
use crate::video::{JpegEncoder, Resolution, SyntheticSource, TimeBase, VideoSource};

/// Multipart boundary
pub const BOUNDARY: &str = "frame";

/// `Content-Type` of the multipart response
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Create MJPEG multipart frame bytes
pub fn create_mjpeg_part(jpeg_data: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(128 + jpeg_data.len());

    buf.put_slice(b"--");
    buf.put_slice(BOUNDARY.as_bytes());
    buf.put_slice(b"\r\n");
    buf.put_slice(b"Content-Type: image/jpeg\r\n");
    buf.put_slice(format!("Content-Length: {}\r\n", jpeg_data.len()).as_bytes());
    buf.put_slice(b"\r\n");

    buf.put_slice(jpeg_data);
    buf.put_slice(b"\r\n");

    buf.freeze()
}

/// Start producing multipart parts for one client
///
/// The producer stops when the returned receiver is dropped. A single-slot
/// channel keeps a slow client from building up latency.
pub fn spawn_test_pattern_stream(video: &VideoConfig, time_base: TimeBase) -> Result<mpsc::Receiver<Bytes>> {
    let resolution = Resolution::new(video.width, video.height);
    if !resolution.is_valid() {
        return Err(AppError::Config(format!("Unsupported resolution {}", resolution)));
    }

    let mut encoder = JpegEncoder::new(resolution, video.jpeg_quality)?;
    let mut source = SyntheticSource::new(resolution, video.fps.clamp(1, 60), time_base);
    let (tx, rx) = mpsc::channel::<Bytes>(1);

    tokio::spawn(async move {
        let mut sent = 0u64;
        loop {
            let frame = tokio::select! {
                _ = tx.closed() => break,
                frame = source.next_frame() => frame,
            };
            let frame = match frame {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("Test pattern source stopped: {}", e);
                    break;
                }
            };
            let jpeg = match encoder.encode(&frame) {
                Ok(jpeg) => jpeg,
                Err(e) => {
                    warn!("{}", e);
                    break;
                }
            };
            if tx.send(create_mjpeg_part(&jpeg)).await.is_err() {
                break;
            }
            sent += 1;
        }
        source.close().await;
        debug!("MJPEG client gone after {} frames", sent);
    });

    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_framing() {
        let part = create_mjpeg_part(&[0xFF, 0xD8, 0xFF, 0xD9]);
        let expected: &[u8] =
            b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 4\r\n\r\n\xFF\xD8\xFF\xD9\r\n";
        assert_eq!(&part[..], expected);
    }

    #[tokio::test]
    async fn test_stream_yields_jpeg_parts() {
        let video = VideoConfig {
            width: 64,
            height: 48,
            fps: 30,
            ..Default::default()
        };
        let mut rx = spawn_test_pattern_stream(&video, TimeBase::new()).unwrap();

        for _ in 0..2 {
            let part = rx.recv().await.unwrap();
            assert!(part.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n"));
            let body_start = part.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
            assert_eq!(&part[body_start..body_start + 2], &[0xFF, 0xD8]);
        }
    }

    #[test]
    fn test_invalid_resolution() {
        let video = VideoConfig {
            width: 7,
            ..Default::default()
        };
        assert!(spawn_test_pattern_stream(&video, TimeBase::new()).is_err());
    }
}
