use serde::{Deserialize, Serialize};

/// Axis-aligned face candidate region, in source image coordinates.
///
/// `x`/`y` are signed because detectors may report boxes that start past the
/// frame edge; [`FaceRect::clamped`] produces the croppable portion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl FaceRect {
    /// Intersect the region with an image of the given dimensions.
    ///
    /// Returns `None` when no part of the region lies inside the image.
    pub fn clamped(&self, img_width: u32, img_height: u32) -> Option<FaceRect> {
        let x0 = self.x.clamp(0, img_width as i32);
        let y0 = self.y.clamp(0, img_height as i32);
        let x1 = self.x.saturating_add(self.width as i32).clamp(0, img_width as i32);
        let y1 = self.y.saturating_add(self.height as i32).clamp(0, img_height as i32);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(FaceRect {
            x: x0,
            y: y0,
            width: (x1 - x0) as u32,
            height: (y1 - y0) as u32,
        })
    }
}

/// A decoded recognition outcome: the subject's display name plus the raw
/// distance reported by the model. Lower distance is a better match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recognition {
    pub subject: String,
    pub distance: f32,
}

/// Map a model distance onto the reported confidence scale.
///
/// Higher is better. Not clamped: a very poor match reads as a negative
/// confidence rather than a floored zero.
pub fn confidence_from_distance(distance: f32) -> f32 {
    100.0 - distance
}
