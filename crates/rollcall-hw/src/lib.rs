//! rollcall-hw — hardware abstraction for webcam capture.
//!
//! Provides V4L2-based camera access and the [`FrameSource`] seam the
//! daemon's capture loop consumes.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, FrameSource, PixelFormat};
pub use frame::Frame;
