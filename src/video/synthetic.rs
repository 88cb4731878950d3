//! Synthetic test pattern source
//!
//! Renders a vertical gradient with a circle orbiting the frame center. The
//! image is a pure function of the frame counter, so tests can predict it.

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tokio::time::{interval, Interval, MissedTickBehavior};

use super::format::Resolution;
use super::frame::{PtsClock, TimeBase, VideoFrame};
use super::source::VideoSource;
use crate::error::{AppError, Result};

const CIRCLE_COLOR: [u8; 3] = [255, 255, 0];
/// Radians the circle advances per frame
const ORBIT_STEP: f64 = 0.05;

pub struct SyntheticSource {
    resolution: Resolution,
    fps: u32,
    counter: u64,
    ticker: Interval,
    clock: PtsClock,
    closed: bool,
}

impl SyntheticSource {
    pub fn new(resolution: Resolution, fps: u32, time_base: TimeBase) -> Self {
        let fps = fps.max(1);
        let mut ticker = interval(Duration::from_secs(1) / fps);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self {
            resolution,
            fps,
            counter: 0,
            ticker,
            clock: PtsClock::new(time_base),
            closed: false,
        }
    }
}

/// Render frame `counter` of the test pattern as RGB24
pub fn render_test_pattern(resolution: Resolution, counter: u64) -> Vec<u8> {
    let width = resolution.width as usize;
    let height = resolution.height as usize;
    let mut data = vec![0u8; resolution.rgb24_len()];

    for (row, line) in data.chunks_exact_mut(width * 3).enumerate() {
        let pixel = [150u8, ((row / 3) % 255) as u8, ((row / 2) % 256) as u8];
        for px in line.chunks_exact_mut(3) {
            px.copy_from_slice(&pixel);
        }
    }

    let phase = counter as f64 * ORBIT_STEP;
    let cx = width as f64 / 2.0 + width as f64 * 0.3125 * phase.sin();
    let cy = height as f64 / 2.0 + height as f64 * 0.2083 * phase.cos();
    let radius = (width.min(height) as f64 * 0.104).max(1.0);

    let x0 = (cx - radius).floor().max(0.0) as usize;
    let x1 = ((cx + radius).ceil() as usize).min(width.saturating_sub(1));
    let y0 = (cy - radius).floor().max(0.0) as usize;
    let y1 = ((cy + radius).ceil() as usize).min(height.saturating_sub(1));

    for y in y0..=y1 {
        for x in x0..=x1 {
            let (dx, dy) = (x as f64 - cx, y as f64 - cy);
            if dx * dx + dy * dy <= radius * radius {
                let i = (y * width + x) * 3;
                data[i..i + 3].copy_from_slice(&CIRCLE_COLOR);
            }
        }
    }

    data
}

#[async_trait]
impl VideoSource for SyntheticSource {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn fps(&self) -> u32 {
        self.fps
    }

    async fn next_frame(&mut self) -> Result<VideoFrame> {
        if self.closed {
            return Err(AppError::CaptureError("synthetic source is closed".into()));
        }
        self.ticker.tick().await;

        let data = render_test_pattern(self.resolution, self.counter);
        let frame = VideoFrame::new(
            Bytes::from(data),
            self.resolution,
            self.counter,
            self.clock.stamp(),
        );
        self.counter += 1;
        Ok(frame)
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}
