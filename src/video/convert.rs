//! Pixel format conversion
//!
//! BT.601 limited-range integer math. Cameras deliver YUYV, the pipeline
//! works in RGB24, and both JPEG and H264 encoders take planar I420.

use super::format::Resolution;
use crate::error::{AppError, Result};

#[inline]
fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

#[inline]
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    [
        clamp_u8((298 * c + 409 * e + 128) >> 8),
        clamp_u8((298 * c - 100 * d - 208 * e + 128) >> 8),
        clamp_u8((298 * c + 516 * d + 128) >> 8),
    ]
}

/// Convert packed YUYV (4:2:2) into packed RGB24
pub fn yuyv_to_rgb24(src: &[u8], resolution: Resolution, dst: &mut Vec<u8>) -> Result<()> {
    let expected = resolution.pixels() * 2;
    if src.len() < expected {
        return Err(AppError::CaptureError(format!(
            "YUYV frame too small: {} < {}",
            src.len(),
            expected
        )));
    }

    dst.clear();
    dst.reserve(resolution.rgb24_len());
    for chunk in src[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        dst.extend_from_slice(&yuv_to_rgb(y0, u, v));
        dst.extend_from_slice(&yuv_to_rgb(y1, u, v));
    }
    Ok(())
}

/// Convert packed RGB24 into planar I420
///
/// Chroma is sampled from the top-left pixel of each 2x2 block.
pub fn rgb24_to_i420(src: &[u8], resolution: Resolution, dst: &mut Vec<u8>) -> Result<()> {
    let width = resolution.width as usize;
    let height = resolution.height as usize;
    if width % 2 != 0 || height % 2 != 0 {
        return Err(AppError::VideoError(format!(
            "I420 needs even dimensions, got {}",
            resolution
        )));
    }
    if src.len() < resolution.rgb24_len() {
        return Err(AppError::VideoError(format!(
            "RGB24 frame too small: {} < {}",
            src.len(),
            resolution.rgb24_len()
        )));
    }

    let y_size = width * height;
    let c_size = y_size / 4;
    dst.clear();
    dst.resize(y_size + 2 * c_size, 0);
    let (y_plane, chroma) = dst.split_at_mut(y_size);
    let (u_plane, v_plane) = chroma.split_at_mut(c_size);

    for row in 0..height {
        for col in 0..width {
            let i = (row * width + col) * 3;
            let (r, g, b) = (src[i] as i32, src[i + 1] as i32, src[i + 2] as i32);

            y_plane[row * width + col] = clamp_u8(((66 * r + 129 * g + 25 * b + 128) >> 8) + 16);

            if row % 2 == 0 && col % 2 == 0 {
                let ci = (row / 2) * (width / 2) + col / 2;
                u_plane[ci] = clamp_u8(((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128);
                v_plane[ci] = clamp_u8(((112 * r - 94 * g - 18 * b + 128) >> 8) + 128);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_gray_roundtrip_values() {
        // Mid gray: Y=126, U=V=128
        let res = Resolution::new(2, 2);
        let src = [126u8, 128, 126, 128, 126, 128, 126, 128];
        let mut rgb = Vec::new();
        yuyv_to_rgb24(&src, res, &mut rgb).unwrap();

        assert_eq!(rgb.len(), 12);
        assert!(rgb.iter().all(|&v| (127..=129).contains(&v)));
    }

    #[test]
    fn test_yuyv_short_buffer() {
        let mut rgb = Vec::new();
        let err = yuyv_to_rgb24(&[0u8; 4], Resolution::new(4, 4), &mut rgb).unwrap_err();
        assert!(matches!(err, AppError::CaptureError(_)));
    }

    #[test]
    fn test_rgb24_to_i420_layout() {
        let res = Resolution::new(4, 2);
        // Pure white
        let src = vec![255u8; res.rgb24_len()];
        let mut i420 = Vec::new();
        rgb24_to_i420(&src, res, &mut i420).unwrap();

        assert_eq!(i420.len(), res.i420_len());
        assert!(i420[..8].iter().all(|&y| y == 235));
        assert!(i420[8..].iter().all(|&c| c == 128));
    }

    #[test]
    fn test_rgb24_to_i420_rejects_odd() {
        let mut out = Vec::new();
        assert!(rgb24_to_i420(&[0u8; 27], Resolution::new(3, 3), &mut out).is_err());
    }
}
