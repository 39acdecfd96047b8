//! Background training worker.
//!
//! Retraining runs on a dedicated OS thread so the save endpoint never waits
//! on it. Requests carry an optional reply channel: the HTTP path fires and
//! forgets, tests and maintenance callers await the report.

use crate::enrollment::{EnrollmentStore, StoreError};
use parking_lot::RwLock;
use rollcall_core::lbph::{ModelError, TrainedModel};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Enrollment images per subject that trigger a retrain.
pub const CAPTURE_QUOTA: usize = 10;

/// Shared handle to the current trained model. Readers are the recognition
/// paths; the only writer is the training worker.
pub type SharedModel = Arc<RwLock<Option<TrainedModel>>>;

#[derive(Error, Debug)]
pub enum TrainError {
    #[error("enrollment store: {0}")]
    Store(#[from] StoreError),
    #[error("model: {0}")]
    Model(#[from] ModelError),
    #[error("training worker exited")]
    WorkerGone,
}

/// Outcome of one retrain pass.
#[derive(Debug, Clone)]
pub struct TrainReport {
    pub subjects: usize,
    pub samples: usize,
    /// False when there was nothing to train on and the pass was a no-op.
    pub trained: bool,
}

struct TrainRequest {
    reply: Option<oneshot::Sender<Result<TrainReport, TrainError>>>,
}

/// Clone-safe handle to the training worker.
#[derive(Clone)]
pub struct TrainerHandle {
    tx: mpsc::Sender<TrainRequest>,
}

impl TrainerHandle {
    /// Schedule a retrain iff this save was the one that filled the
    /// subject's quota. Returns whether training was scheduled.
    ///
    /// `pre_save_count` is the ordinal the save used, i.e. the image count
    /// before it; only the save bringing the count to exactly
    /// [`CAPTURE_QUOTA`] fires, so later saves never re-trigger.
    pub fn maybe_retrain(&self, subject: &str, pre_save_count: usize) -> bool {
        if pre_save_count + 1 != CAPTURE_QUOTA {
            return false;
        }
        tracing::info!(subject, quota = CAPTURE_QUOTA, "capture quota reached; scheduling retrain");
        self.schedule();
        true
    }

    /// Queue a retrain without waiting for it. A full queue means a retrain
    /// is already pending, which covers this request too.
    pub fn schedule(&self) {
        match self.tx.try_send(TrainRequest { reply: None }) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!("retrain already pending; request coalesced")
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::error!("training worker is gone; retrain dropped")
            }
        }
    }

    /// Run a retrain and wait for its report.
    pub async fn retrain_and_wait(&self) -> Result<TrainReport, TrainError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(TrainRequest { reply: Some(reply_tx) })
            .await
            .map_err(|_| TrainError::WorkerGone)?;
        reply_rx.await.map_err(|_| TrainError::WorkerGone)?
    }
}

/// Spawn the training worker on a dedicated OS thread.
pub fn spawn_trainer(
    store: EnrollmentStore,
    model: SharedModel,
    model_path: PathBuf,
) -> TrainerHandle {
    let (tx, mut rx) = mpsc::channel::<TrainRequest>(2);

    std::thread::Builder::new()
        .name("rollcall-trainer".into())
        .spawn(move || {
            tracing::debug!("training worker started");
            while let Some(req) = rx.blocking_recv() {
                let result = train_all(&store, &model, &model_path);
                if let Err(e) = &result {
                    tracing::error!(error = %e, "retrain failed");
                }
                if let Some(reply) = req.reply {
                    let _ = reply.send(result);
                }
            }
            tracing::debug!("training worker exiting");
        })
        .expect("failed to spawn training worker");

    TrainerHandle { tx }
}

/// Rebuild the model from every stored enrollment image.
///
/// With zero loadable samples the pass is a no-op: both the model file and
/// the in-memory handle keep their previous state.
fn train_all(
    store: &EnrollmentStore,
    model: &SharedModel,
    model_path: &Path,
) -> Result<TrainReport, TrainError> {
    let set = store.load_samples()?;
    if set.samples.is_empty() {
        tracing::warn!("no enrollment images found; skipping training");
        return Ok(TrainReport { subjects: set.subjects.len(), samples: 0, trained: false });
    }

    let subjects = set.subjects.len();
    let samples = set.samples.len();
    let trained = TrainedModel::new(set.subjects, &set.samples, &set.labels)?;
    trained.save(model_path)?;
    *model.write() = Some(trained);

    tracing::info!(subjects, samples, path = %model_path.display(), "model retrained");
    Ok(TrainReport { subjects, samples, trained: true })
}
