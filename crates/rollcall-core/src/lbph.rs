//! LBPH face recognizer.
//!
//! Each normalized face crop is encoded as a grid of local-binary-pattern
//! histograms; prediction is nearest-neighbor chi-square matching over the
//! trained samples. The serialized form bundles the sample histograms with
//! the subject table they were trained against, so a prediction decodes to a
//! name without consulting the filesystem.

use crate::types::Recognition;
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

// Operator parameters carried over from the original classroom deployment.
const LBP_RADIUS: f32 = 2.0;
const LBP_NEIGHBORS: u32 = 8;
const GRID_X: u32 = 8;
const GRID_Y: u32 = 8;
const HISTOGRAM_BINS: usize = 1 << LBP_NEIGHBORS;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model has no training samples")]
    Empty,
    #[error("sample and label counts differ: {samples} samples, {labels} labels")]
    LabelMismatch { samples: usize, labels: usize },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("model file is not a valid bundle: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// One trained sample: its grid histogram and the subject index it carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SampleHistogram {
    label: u32,
    bins: Vec<f32>,
}

/// LBPH model state: the histogram of every training sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lbph {
    samples: Vec<SampleHistogram>,
}

impl Lbph {
    /// Train from scratch on the full sample set. Labels are parallel to
    /// samples; training is a full rebuild, never incremental.
    pub fn train(samples: &[GrayImage], labels: &[u32]) -> Result<Self, ModelError> {
        if samples.is_empty() {
            return Err(ModelError::Empty);
        }
        if samples.len() != labels.len() {
            return Err(ModelError::LabelMismatch {
                samples: samples.len(),
                labels: labels.len(),
            });
        }
        let samples = samples
            .iter()
            .zip(labels)
            .map(|(img, &label)| SampleHistogram { label, bins: grid_histogram(img) })
            .collect();
        Ok(Self { samples })
    }

    /// Nearest-neighbor prediction: `(label, distance)` of the closest
    /// trained sample. Lower distance is a better match.
    pub fn predict(&self, probe: &GrayImage) -> Result<(u32, f32), ModelError> {
        let bins = grid_histogram(probe);
        let mut best: Option<(u32, f32)> = None;
        for sample in &self.samples {
            let d = chi_square(&bins, &sample.bins);
            if best.map(|(_, bd)| d < bd).unwrap_or(true) {
                best = Some((sample.label, d));
            }
        }
        best.ok_or(ModelError::Empty)
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}

/// A trained recognizer plus the subject table it was trained against.
///
/// The table is written at training time and decoded at prediction time;
/// directory churn between the two cannot shift the index→name mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedModel {
    pub subjects: Vec<String>,
    model: Lbph,
}

impl TrainedModel {
    /// Train a model over `samples`, where each label indexes into
    /// `subjects`.
    pub fn new(
        subjects: Vec<String>,
        samples: &[GrayImage],
        labels: &[u32],
    ) -> Result<Self, ModelError> {
        Ok(Self { subjects, model: Lbph::train(samples, labels)? })
    }

    /// Predict and decode against the persisted subject table.
    ///
    /// `Ok(None)` means the predicted index has no entry in the table: the
    /// no-subject-recognized outcome, distinct from a model failure.
    pub fn recognize(&self, crop: &GrayImage) -> Result<Option<Recognition>, ModelError> {
        let (label, distance) = self.model.predict(crop)?;
        Ok(self
            .subjects
            .get(label as usize)
            .map(|name| Recognition { subject: name.clone(), distance }))
    }

    /// Persist the bundle atomically: write a sibling temp file, then rename
    /// over the destination.
    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        let encoded = serde_json::to_vec(self)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &encoded)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ModelError> {
        Ok(serde_json::from_slice(&fs::read(path)?)?)
    }
}

/// Concatenated per-cell LBP histograms over a `GRID_X` × `GRID_Y` split of
/// the code image. Counts are raw, not normalized.
fn grid_histogram(img: &GrayImage) -> Vec<f32> {
    let (codes, cw, ch) = lbp_codes(img);
    let mut bins = vec![0.0f32; (GRID_X * GRID_Y) as usize * HISTOGRAM_BINS];
    if cw < GRID_X || ch < GRID_Y {
        // Degenerate input smaller than the grid; nothing to count.
        return bins;
    }
    let cell_w = cw / GRID_X;
    let cell_h = ch / GRID_Y;
    for gy in 0..GRID_Y {
        for gx in 0..GRID_X {
            let cell = ((gy * GRID_X + gx) as usize) * HISTOGRAM_BINS;
            for y in gy * cell_h..(gy + 1) * cell_h {
                for x in gx * cell_w..(gx + 1) * cell_w {
                    let code = codes[(y * cw + x) as usize];
                    bins[cell + code as usize] += 1.0;
                }
            }
        }
    }
    bins
}

/// Circular LBP code image: for each interior pixel, one bit per neighbor
/// sampled on a radius-`LBP_RADIUS` circle with bilinear interpolation, set
/// when the neighbor is at least as bright as the center.
fn lbp_codes(img: &GrayImage) -> (Vec<u8>, u32, u32) {
    let (w, h) = img.dimensions();
    let margin = LBP_RADIUS.ceil() as u32;
    if w <= 2 * margin || h <= 2 * margin {
        return (Vec::new(), 0, 0);
    }
    let cw = w - 2 * margin;
    let ch = h - 2 * margin;

    let offsets: Vec<(f32, f32)> = (0..LBP_NEIGHBORS)
        .map(|k| {
            let angle = 2.0 * std::f32::consts::PI * k as f32 / LBP_NEIGHBORS as f32;
            (LBP_RADIUS * angle.cos(), -LBP_RADIUS * angle.sin())
        })
        .collect();

    let raw = img.as_raw();
    let mut codes = Vec::with_capacity((cw * ch) as usize);
    for y in margin..h - margin {
        for x in margin..w - margin {
            let center = raw[(y * w + x) as usize] as f32;
            let mut code = 0u8;
            for (bit, &(dx, dy)) in offsets.iter().enumerate() {
                let sample = bilinear(raw, w, h, x as f32 + dx, y as f32 + dy);
                if sample >= center {
                    code |= 1 << bit;
                }
            }
            codes.push(code);
        }
    }
    (codes, cw, ch)
}

/// Bilinear sample with the four corners clamped to the image. A neighbor
/// offset on an axis lands exactly on the border row/column, so the +1
/// corner can otherwise step outside the buffer.
fn bilinear(raw: &[u8], w: u32, h: u32, x: f32, y: f32) -> f32 {
    let x0 = (x.floor().max(0.0) as u32).min(w - 1);
    let y0 = (y.floor().max(0.0) as u32).min(h - 1);
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;
    let at = |xx: u32, yy: u32| raw[(yy * w + xx) as usize] as f32;
    let tl = at(x0, y0);
    let tr = at(x1, y0);
    let bl = at(x0, y1);
    let br = at(x1, y1);
    tl * (1.0 - fx) * (1.0 - fy) + tr * fx * (1.0 - fy) + bl * (1.0 - fx) * fy + br * fx * fy
}

/// Chi-square distance between two histograms of equal length.
fn chi_square(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| {
            let sum = x + y;
            if sum > 0.0 { (x - y) * (x - y) / sum } else { 0.0 }
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn horizontal_stripes(phase: u32) -> GrayImage {
        GrayImage::from_fn(128, 128, |_, y| {
            if ((y + phase) / 6) % 2 == 0 { Luma([220]) } else { Luma([30]) }
        })
    }

    fn vertical_stripes(phase: u32) -> GrayImage {
        GrayImage::from_fn(128, 128, |x, _| {
            if ((x + phase) / 6) % 2 == 0 { Luma([220]) } else { Luma([30]) }
        })
    }

    #[test]
    fn test_train_rejects_empty() {
        assert!(matches!(Lbph::train(&[], &[]), Err(ModelError::Empty)));
    }

    #[test]
    fn test_train_rejects_label_mismatch() {
        let imgs = vec![horizontal_stripes(0)];
        let err = Lbph::train(&imgs, &[0, 1]).unwrap_err();
        assert!(matches!(err, ModelError::LabelMismatch { samples: 1, labels: 2 }));
    }

    #[test]
    fn test_identical_probe_has_zero_distance() {
        let imgs = vec![horizontal_stripes(0), vertical_stripes(0)];
        let model = Lbph::train(&imgs, &[0, 1]).unwrap();
        let (label, distance) = model.predict(&horizontal_stripes(0)).unwrap();
        assert_eq!(label, 0);
        assert_eq!(distance, 0.0);
    }

    #[test]
    fn test_predict_prefers_own_texture_class() {
        let imgs = vec![
            horizontal_stripes(0),
            horizontal_stripes(2),
            vertical_stripes(0),
            vertical_stripes(2),
        ];
        let model = Lbph::train(&imgs, &[0, 0, 1, 1]).unwrap();

        // Held-out phases of each texture must land in the right class.
        let (label, _) = model.predict(&horizontal_stripes(4)).unwrap();
        assert_eq!(label, 0);
        let (label, _) = model.predict(&vertical_stripes(4)).unwrap();
        assert_eq!(label, 1);
    }

    #[test]
    fn test_chi_square_properties() {
        let a = [4.0, 0.0, 2.0];
        assert_eq!(chi_square(&a, &a), 0.0);
        // Symmetric, and disjoint mass costs the full sum.
        let b = [0.0, 4.0, 2.0];
        assert_eq!(chi_square(&a, &b), chi_square(&b, &a));
        assert_eq!(chi_square(&[2.0, 0.0], &[0.0, 2.0]), 4.0);
    }

    #[test]
    fn test_recognize_decodes_subject_table() {
        let imgs = vec![horizontal_stripes(0), vertical_stripes(0)];
        let model =
            TrainedModel::new(vec!["ana".into(), "bruno".into()], &imgs, &[0, 1]).unwrap();
        let rec = model.recognize(&vertical_stripes(1)).unwrap().unwrap();
        assert_eq!(rec.subject, "bruno");
    }

    #[test]
    fn test_recognize_out_of_table_label_is_none() {
        // A label with no table entry is the no-subject outcome, not a panic.
        let imgs = vec![horizontal_stripes(0)];
        let model = TrainedModel::new(vec!["ana".into()], &imgs, &[7]).unwrap();
        assert!(model.recognize(&horizontal_stripes(0)).unwrap().is_none());
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("modelo.yml");

        let imgs = vec![horizontal_stripes(0), vertical_stripes(0)];
        let model =
            TrainedModel::new(vec!["ana".into(), "bruno".into()], &imgs, &[0, 1]).unwrap();
        model.save(&path).unwrap();

        // No temp file may survive a successful save.
        assert!(!dir.path().join("modelo.tmp").exists());

        let loaded = TrainedModel::load(&path).unwrap();
        assert_eq!(loaded.subjects, model.subjects);
        let rec = loaded.recognize(&horizontal_stripes(0)).unwrap().unwrap();
        assert_eq!(rec.subject, "ana");
        assert_eq!(rec.distance, 0.0);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = TrainedModel::load(Path::new("/nonexistent/modelo.yml")).unwrap_err();
        assert!(matches!(err, ModelError::Io(_)));
    }
}
