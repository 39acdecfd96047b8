//! rollcall-core — face location and recognition engine.
//!
//! Face candidates come from the SeetaFace detector (`rustface`) behind the
//! [`locator::FaceLocator`] seam; recognition is an LBPH model trained from
//! enrolled face crops.

pub mod detect;
pub mod lbph;
pub mod locator;
pub mod types;

pub use detect::{detect_faces, normalize_crop, Detected, CROP_SIZE};
pub use lbph::{Lbph, TrainedModel};
pub use locator::{FaceLocator, SeetaLocator};
pub use types::{confidence_from_distance, FaceRect, Recognition};
