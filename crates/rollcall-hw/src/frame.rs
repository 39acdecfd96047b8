//! Captured frame type and pixel-format conversion.

use image::GrayImage;
use thiserror::Error;

/// A single grayscale camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Grayscale pixels, `width * height` bytes, row-major.
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Driver-assigned capture sequence number.
    pub sequence: u32,
}

impl Frame {
    /// View the frame as an image buffer. `None` when the byte count does
    /// not match the dimensions.
    pub fn into_image(self) -> Option<GrayImage> {
        GrayImage::from_raw(self.width, self.height, self.data)
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("{format} buffer too short for {width}x{height}: expected {expected} bytes, got {actual}")]
    BufferTooShort {
        format: &'static str,
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
}

/// Extract the Y channel from packed YUYV 4:2:2.
///
/// YUYV packs two pixels per 4 bytes as [Y0, U, Y1, V]; luma is every
/// even-indexed byte.
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::BufferTooShort {
            format: "YUYV",
            width,
            height,
            expected,
            actual: yuyv.len(),
        });
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_extracts_luma_bytes() {
        // 2x1 image: [Y0=100, U=128, Y1=200, V=128]
        let gray = yuyv_to_grayscale(&[100, 128, 200, 128], 2, 1).unwrap();
        assert_eq!(gray, vec![100, 200]);
    }

    #[test]
    fn test_yuyv_ignores_trailing_bytes() {
        let mut yuyv: Vec<u8> = (0..16).collect();
        yuyv.extend_from_slice(&[99, 99]); // driver slack
        let gray = yuyv_to_grayscale(&yuyv, 4, 2).unwrap();
        assert_eq!(gray, vec![0, 2, 4, 6, 8, 10, 12, 14]);
    }

    #[test]
    fn test_yuyv_short_buffer() {
        assert!(yuyv_to_grayscale(&[1, 2], 2, 1).is_err());
    }

    #[test]
    fn test_frame_into_image() {
        let frame = Frame { data: vec![7; 12], width: 4, height: 3, sequence: 0 };
        let img = frame.into_image().unwrap();
        assert_eq!(img.dimensions(), (4, 3));
        assert_eq!(img.get_pixel(3, 2).0, [7]);
    }

    #[test]
    fn test_frame_into_image_size_mismatch() {
        let frame = Frame { data: vec![7; 11], width: 4, height: 3, sequence: 0 };
        assert!(frame.into_image().is_none());
    }
}
