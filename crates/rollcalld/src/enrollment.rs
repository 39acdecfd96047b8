//! On-disk enrollment store: one directory per subject holding normalized
//! face crops named `<subject>_<n>.jpg` with ordinals starting at 0.

use image::GrayImage;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid subject name")]
    InvalidName,
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("image codec: {0}")]
    Image(#[from] image::ImageError),
}

/// Validate a raw subject name: trimmed, non-empty, alphanumeric only.
///
/// The name becomes a path segment and a filename prefix, so whitespace,
/// punctuation, and separators are rejected outright.
pub fn validate_subject_name(raw: &str) -> Result<&str, StoreError> {
    let name = raw.trim();
    if name.is_empty() || !name.chars().all(char::is_alphanumeric) {
        return Err(StoreError::InvalidName);
    }
    Ok(name)
}

#[derive(Clone)]
pub struct EnrollmentStore {
    root: PathBuf,
}

/// Everything loadable from the store, ready for a training pass. Labels
/// index into `subjects` and parallel `samples`.
pub struct TrainingSet {
    pub subjects: Vec<String>,
    pub samples: Vec<GrayImage>,
    pub labels: Vec<u32>,
}

impl EnrollmentStore {
    pub fn new(root: PathBuf) -> Result<Self, StoreError> {
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist a normalized crop for `subject`, returning the ordinal used.
    ///
    /// The ordinal is recomputed from the current file count rather than a
    /// persisted counter; two concurrent saves for one subject can observe
    /// the same count, in which case the later write wins. Accepted race:
    /// the capture UI submits one photo at a time.
    pub fn record(&self, subject: &str, crop: &GrayImage) -> Result<usize, StoreError> {
        let dir = self.root.join(subject);
        fs::create_dir_all(&dir)?;
        let index = count_files(&dir)?;
        crop.save(dir.join(format!("{subject}_{index}.jpg")))?;
        tracing::debug!(subject, index, "enrollment image saved");
        Ok(index)
    }

    /// All enrolled subjects, sorted by name. This listing defines the label
    /// assignment used at training time.
    pub fn subjects(&self) -> Result<Vec<String>, StoreError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Number of images currently stored for `subject`.
    pub fn image_count(&self, subject: &str) -> Result<usize, StoreError> {
        let dir = self.root.join(subject);
        if !dir.exists() {
            return Ok(0);
        }
        Ok(count_files(&dir)?)
    }

    /// Load every readable enrollment image, labeled by its subject's
    /// position in the sorted listing.
    ///
    /// Unreadable files are skipped with a diagnostic; training proceeds on
    /// whatever loads. A bad file costs one sample, not the whole pass.
    pub fn load_samples(&self) -> Result<TrainingSet, StoreError> {
        let subjects = self.subjects()?;
        let mut samples = Vec::new();
        let mut labels = Vec::new();

        for (label, subject) in subjects.iter().enumerate() {
            let dir = self.root.join(subject);
            let mut paths: Vec<PathBuf> = fs::read_dir(&dir)?
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
                .map(|e| e.path())
                .collect();
            paths.sort();

            for path in paths {
                match image::open(&path) {
                    Ok(img) => {
                        samples.push(img.to_luma8());
                        labels.push(label as u32);
                    }
                    Err(e) => tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "skipping unreadable enrollment image"
                    ),
                }
            }
        }

        Ok(TrainingSet { subjects, samples, labels })
    }
}

fn count_files(dir: &Path) -> Result<usize, io::Error> {
    let mut count = 0;
    for entry in fs::read_dir(dir)? {
        if entry?.file_type()?.is_file() {
            count += 1;
        }
    }
    Ok(count)
}
