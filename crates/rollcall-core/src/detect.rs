//! Detection adapter: color image in, candidate rectangles out, plus face
//! crop normalization for the recognizer.

use crate::locator::{FaceLocator, LocatorError};
use crate::types::FaceRect;
use image::{imageops, DynamicImage, GrayImage};

/// Side length of a normalized face crop, in pixels. Every enrolled image
/// and every probe handed to the recognizer uses this size.
pub const CROP_SIZE: u32 = 128;

/// Result of a detection pass: the grayscale conversion that was searched,
/// and the candidate regions in detector order.
pub struct Detected {
    pub gray: GrayImage,
    pub faces: Vec<FaceRect>,
}

impl Detected {
    /// Whether the pass found any face at all. An empty candidate set is a
    /// distinct no-face outcome, not a failure.
    pub fn any(&self) -> bool {
        !self.faces.is_empty()
    }
}

/// Locate faces in a color image under the process-wide detection policy.
pub fn detect_faces(
    locator: &dyn FaceLocator,
    image: &DynamicImage,
) -> Result<Detected, LocatorError> {
    let gray = image.to_luma8();
    let faces = locator.locate(&gray)?;
    Ok(Detected { gray, faces })
}

/// Crop a face region out of a grayscale frame and normalize it to
/// `CROP_SIZE` × `CROP_SIZE`.
///
/// The region is clamped to the frame first; `None` means the rectangle lay
/// entirely outside it.
pub fn normalize_crop(gray: &GrayImage, rect: &FaceRect) -> Option<GrayImage> {
    let (w, h) = gray.dimensions();
    let r = rect.clamped(w, h)?;
    let crop = imageops::crop_imm(gray, r.x as u32, r.y as u32, r.width, r.height).to_image();
    Some(imageops::resize(
        &crop,
        CROP_SIZE,
        CROP_SIZE,
        imageops::FilterType::Triangle,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    struct FixedLocator(Vec<FaceRect>);

    impl FaceLocator for FixedLocator {
        fn locate(&self, _gray: &GrayImage) -> Result<Vec<FaceRect>, LocatorError> {
            Ok(self.0.clone())
        }
    }

    fn gradient(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_fn(width, height, |x, y| {
            Luma([(x + y) as u8])
        }))
    }

    #[test]
    fn test_detect_faces_no_face_is_empty_not_error() {
        let locator = FixedLocator(vec![]);
        let det = detect_faces(&locator, &gradient(64, 64)).unwrap();
        assert!(!det.any());
    }

    #[test]
    fn test_detect_faces_passes_through_rects() {
        let rect = FaceRect { x: 4, y: 4, width: 20, height: 20 };
        let locator = FixedLocator(vec![rect]);
        let det = detect_faces(&locator, &gradient(64, 64)).unwrap();
        assert_eq!(det.faces, vec![rect]);
        assert_eq!(det.gray.dimensions(), (64, 64));
    }

    #[test]
    fn test_normalize_crop_is_fixed_size() {
        let gray = gradient(64, 64).to_luma8();
        let rect = FaceRect { x: 8, y: 8, width: 32, height: 48 };
        let crop = normalize_crop(&gray, &rect).unwrap();
        assert_eq!(crop.dimensions(), (CROP_SIZE, CROP_SIZE));
    }

    #[test]
    fn test_normalize_crop_clamps_overhanging_rect() {
        let gray = gradient(64, 64).to_luma8();
        let rect = FaceRect { x: -10, y: 50, width: 40, height: 40 };
        let crop = normalize_crop(&gray, &rect).unwrap();
        assert_eq!(crop.dimensions(), (CROP_SIZE, CROP_SIZE));
    }

    #[test]
    fn test_normalize_crop_outside_frame() {
        let gray = gradient(64, 64).to_luma8();
        let rect = FaceRect { x: 100, y: 100, width: 10, height: 10 };
        assert!(normalize_crop(&gray, &rect).is_none());
    }
}
