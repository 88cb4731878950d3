//! Frame geometry

use serde::{Deserialize, Serialize};
use std::fmt;

/// Frame resolution in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// 4:2:0 encoders need even dimensions
    pub fn is_valid(&self) -> bool {
        self.width >= 16
            && self.height >= 16
            && self.width <= 7680
            && self.height <= 4320
            && self.width % 2 == 0
            && self.height % 2 == 0
    }

    pub fn pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Packed RGB24 frame size
    pub fn rgb24_len(&self) -> usize {
        self.pixels() * 3
    }

    /// Planar I420 frame size
    pub fn i420_len(&self) -> usize {
        self.pixels() * 3 / 2
    }

    pub const VGA: Resolution = Resolution {
        width: 640,
        height: 480,
    };
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution() {
        let vga = Resolution::VGA;
        assert!(vga.is_valid());
        assert_eq!(vga.rgb24_len(), 640 * 480 * 3);
        assert_eq!(vga.i420_len(), 640 * 480 * 3 / 2);
        assert_eq!(vga.to_string(), "640x480");

        assert!(!Resolution::new(641, 480).is_valid());
        assert!(!Resolution::new(0, 0).is_valid());
    }
}
