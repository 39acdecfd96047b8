//! Face location behind a trait seam.
//!
//! The production locator wraps the SeetaFace detector from `rustface`. The
//! detector handle is neither `Send` nor `Sync`, so it lives on a dedicated
//! worker thread and [`SeetaLocator`] talks to it over a channel.

use crate::types::FaceRect;
use crossbeam_channel::{bounded, Sender};
use image::GrayImage;
use rustface::{Detector, ImageData};
use thiserror::Error;

// Fixed process-wide detection policy. Tuning is a build-time decision,
// not a per-call parameter.
const MIN_FACE_SIZE: u32 = 40;
const SCORE_THRESH: f64 = 2.0;
const PYRAMID_SCALE_FACTOR: f32 = 0.8;
const SLIDE_WINDOW_STEP: u32 = 4;

#[derive(Error, Debug)]
pub enum LocatorError {
    #[error("detector model not found: {0}")]
    ModelNotFound(String),
    #[error("failed to load detector model {path}: {reason}")]
    ModelLoadFailed { path: String, reason: String },
    #[error("locator worker exited")]
    WorkerGone,
}

/// Source of face candidate regions for a grayscale image.
///
/// An empty result is the legitimate no-face outcome, not an error; callers
/// must branch on it before cropping.
pub trait FaceLocator: Send + Sync {
    /// Every candidate region, in detector order.
    fn locate(&self, gray: &GrayImage) -> Result<Vec<FaceRect>, LocatorError>;
}

struct LocateRequest {
    gray: GrayImage,
    reply: Sender<Vec<FaceRect>>,
}

/// SeetaFace (`rustface`) locator running on a dedicated worker thread.
#[derive(Debug)]
pub struct SeetaLocator {
    tx: Sender<LocateRequest>,
}

impl SeetaLocator {
    /// Load the SeetaFace model file and spawn the worker.
    pub fn open(model_path: &str) -> Result<Self, LocatorError> {
        if !std::path::Path::new(model_path).exists() {
            return Err(LocatorError::ModelNotFound(model_path.to_string()));
        }

        let (tx, rx) = crossbeam_channel::unbounded::<LocateRequest>();
        let (ready_tx, ready_rx) = bounded::<Result<(), LocatorError>>(1);
        let path = model_path.to_string();

        std::thread::Builder::new()
            .name("face-locator".into())
            .spawn(move || {
                // The detector must be created on this thread; its handle
                // cannot cross thread boundaries.
                let mut detector = match rustface::create_detector(&path) {
                    Ok(d) => d,
                    Err(e) => {
                        let _ = ready_tx.send(Err(LocatorError::ModelLoadFailed {
                            path,
                            reason: e.to_string(),
                        }));
                        return;
                    }
                };
                detector.set_min_face_size(MIN_FACE_SIZE);
                detector.set_score_thresh(SCORE_THRESH);
                detector.set_pyramid_scale_factor(PYRAMID_SCALE_FACTOR);
                detector.set_slide_window_step(SLIDE_WINDOW_STEP, SLIDE_WINDOW_STEP);
                let _ = ready_tx.send(Ok(()));

                for req in rx {
                    let (width, height) = req.gray.dimensions();
                    let mut image = ImageData::new(req.gray.as_raw(), width, height);
                    let rects = detector
                        .detect(&mut image)
                        .iter()
                        .map(|face| {
                            let bbox = face.bbox();
                            FaceRect {
                                x: bbox.x(),
                                y: bbox.y(),
                                width: bbox.width(),
                                height: bbox.height(),
                            }
                        })
                        .collect();
                    let _ = req.reply.send(rects);
                }
                tracing::debug!("face locator worker exiting");
            })
            .expect("failed to spawn face locator thread");

        ready_rx.recv().map_err(|_| LocatorError::WorkerGone)??;
        tracing::info!(path = model_path, "SeetaFace locator ready");
        Ok(Self { tx })
    }
}

impl FaceLocator for SeetaLocator {
    fn locate(&self, gray: &GrayImage) -> Result<Vec<FaceRect>, LocatorError> {
        let (reply_tx, reply_rx) = bounded(1);
        self.tx
            .send(LocateRequest { gray: gray.clone(), reply: reply_tx })
            .map_err(|_| LocatorError::WorkerGone)?;
        reply_rx.recv().map_err(|_| LocatorError::WorkerGone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_model() {
        let err = SeetaLocator::open("/nonexistent/seeta.bin").unwrap_err();
        assert!(matches!(err, LocatorError::ModelNotFound(_)));
    }
}
