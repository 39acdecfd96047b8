use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod enrollment;
mod error;
mod mailbox;
mod routes;
mod stream;
mod trainer;

use config::Config;
use enrollment::EnrollmentStore;
use mailbox::Mailbox;
use rollcall_core::lbph::{ModelError, TrainedModel};
use rollcall_core::locator::{FaceLocator, SeetaLocator};
use rollcall_hw::Camera;
use routes::AppState;
use stream::FeedPublisher;
use trainer::SharedModel;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();
    tracing::info!(
        bind = %config.bind_addr,
        imagens = %config.image_root.display(),
        modelo = %config.model_path.display(),
        "rollcalld starting"
    );

    let store = EnrollmentStore::new(config.image_root.clone())?;
    tracing::debug!(root = %store.root().display(), "enrollment store ready");
    for subject in store.subjects()? {
        tracing::debug!(subject = %subject, images = store.image_count(&subject)?, "enrolled subject");
    }

    let model: SharedModel = Arc::new(load_existing_model(&config).into());

    let locator: Arc<dyn FaceLocator> =
        Arc::new(SeetaLocator::open(&config.locator_model_path)?);

    let trainer = trainer::spawn_trainer(
        store.clone(),
        Arc::clone(&model),
        config.model_path.clone(),
    );

    let mailbox = Arc::new(Mailbox::new());
    let feed = start_camera(&config, &locator, &model, &mailbox);

    let state = AppState {
        store,
        locator,
        model,
        trainer,
        mailbox,
        feed,
    };

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "rollcalld ready");
    axum::serve(listener, routes::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Load the previously trained model if one is on disk. Absent file means
/// the process starts untrained; a corrupt file is reported and ignored.
fn load_existing_model(config: &Config) -> Option<TrainedModel> {
    match TrainedModel::load(&config.model_path) {
        Ok(model) => {
            tracing::info!(
                path = %config.model_path.display(),
                subjects = model.subjects.len(),
                "loaded trained model"
            );
            Some(model)
        }
        Err(ModelError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            tracing::warn!(
                path = %config.model_path.display(),
                error = %e,
                "existing model file unusable; starting untrained"
            );
            None
        }
    }
}

/// Open the camera and spawn the live loop. A missing or failing camera
/// only disables the feed; the photo endpoints keep working.
fn start_camera(
    config: &Config,
    locator: &Arc<dyn FaceLocator>,
    model: &SharedModel,
    mailbox: &Arc<Mailbox>,
) -> Option<FeedPublisher> {
    if !config.camera_enabled {
        tracing::info!("camera disabled via ROLLCALL_CAMERA_ENABLED=0");
        return None;
    }
    match Camera::open(&config.camera_device) {
        Ok(camera) => {
            let feed = FeedPublisher::new();
            stream::spawn_capture_loop(
                camera,
                Arc::clone(locator),
                Arc::clone(model),
                Arc::clone(mailbox),
                feed.clone(),
            );
            Some(feed)
        }
        Err(e) => {
            tracing::warn!(
                device = %config.camera_device,
                error = %e,
                "camera unavailable; video feed disabled"
            );
            None
        }
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("rollcalld shutting down");
}
