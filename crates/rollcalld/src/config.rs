use std::path::PathBuf;

/// Daemon configuration, loaded from `ROLLCALL_*` environment variables.
pub struct Config {
    /// Listen address for the HTTP surface.
    pub bind_addr: String,
    /// Root directory of the enrollment store (one subdirectory per subject).
    pub image_root: PathBuf,
    /// Path of the serialized recognizer model.
    pub model_path: PathBuf,
    /// Path of the SeetaFace detector model file.
    pub locator_model_path: String,
    /// V4L2 device for the live feed.
    pub camera_device: String,
    /// Whether to open the camera at all; photo endpoints work without it.
    pub camera_enabled: bool,
}

impl Config {
    /// Load configuration from the environment with defaults.
    pub fn from_env() -> Self {
        Self {
            bind_addr: env_or("ROLLCALL_BIND", "127.0.0.1:5000"),
            image_root: PathBuf::from(env_or("ROLLCALL_IMAGE_DIR", "imagens")),
            model_path: PathBuf::from(env_or("ROLLCALL_MODEL_PATH", "modelo.yml")),
            locator_model_path: env_or("ROLLCALL_LOCATOR_MODEL", "seeta_fd_frontal_v1.0.bin"),
            camera_device: env_or("ROLLCALL_CAMERA_DEVICE", "/dev/video0"),
            camera_enabled: std::env::var("ROLLCALL_CAMERA_ENABLED")
                .map(|v| v != "0")
                .unwrap_or(true),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
