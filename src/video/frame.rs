//! Video frame data structures and presentation timestamps

use bytes::Bytes;
use std::time::{Duration, Instant};

use super::format::Resolution;

/// A packed RGB24 video frame
#[derive(Debug, Clone)]
pub struct VideoFrame {
    data: Bytes,
    pub resolution: Resolution,
    /// Frame sequence number, starting at 0 per source
    pub sequence: u64,
    /// Presentation timestamp relative to the source's time base
    pub pts: Duration,
}

impl VideoFrame {
    pub fn new(data: Bytes, resolution: Resolution, sequence: u64, pts: Duration) -> Self {
        Self {
            data,
            resolution,
            sequence,
            pts,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

}

/// Shared origin for presentation timestamps
#[derive(Debug, Clone, Copy)]
pub struct TimeBase {
    origin: Instant,
}

impl TimeBase {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }
}

impl Default for TimeBase {
    fn default() -> Self {
        Self::new()
    }
}

/// Hands out strictly increasing timestamps on a [`TimeBase`]
#[derive(Debug)]
pub struct PtsClock {
    base: TimeBase,
    last: Option<Duration>,
}

impl PtsClock {
    pub fn new(base: TimeBase) -> Self {
        Self { base, last: None }
    }

    /// Timestamp for a frame captured now
    pub fn stamp(&mut self) -> Duration {
        self.stamp_at(self.base.elapsed())
    }

    fn stamp_at(&mut self, now: Duration) -> Duration {
        let pts = match self.last {
            Some(last) if now <= last => last + Duration::from_micros(1),
            _ => now,
        };
        self.last = Some(pts);
        pts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pts_strictly_increasing() {
        let mut clock = PtsClock::new(TimeBase::new());
        let a = clock.stamp_at(Duration::from_millis(10));
        // A clock reading that goes backwards still yields a later stamp
        let b = clock.stamp_at(Duration::from_millis(5));
        let c = clock.stamp_at(Duration::from_millis(10));
        let d = clock.stamp_at(Duration::from_millis(50));

        assert!(a < b && b < c && c < d);
        assert_eq!(d, Duration::from_millis(50));
    }

    #[test]
    fn test_frame_accessors() {
        let frame = VideoFrame::new(
            Bytes::from(vec![1u8; 12]),
            Resolution::new(2, 2),
            7,
            Duration::from_millis(33),
        );
        assert_eq!(frame.data().len(), 12);
        assert_eq!(frame.sequence, 7);
    }
}
