use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("could not load image for '{label}' from {}: {reason}", path.display())]
    ImageLoad {
        label: String,
        path: PathBuf,
        reason: String,
    },

    #[error("no animal images were loaded from {}", dir.display())]
    NoImagesLoaded { dir: PathBuf },

    #[error("could not load face detection model from {}: {reason}", path.display())]
    ClassifierLoad { path: PathBuf, reason: String },

    #[error("could not open webcam: {0}")]
    CameraUnavailable(String),

    #[error("failed to grab frame: {0}")]
    FrameRead(String),

    #[error("window error: {0}")]
    Window(String),
}
