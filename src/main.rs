mod compositor;
mod detector;
mod error;
mod scheduler;
mod store;
mod types;
mod vision;

use std::{path::PathBuf, time::Duration};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use detector::{DetectorConfig, OnnxFaceDetector};
use store::{ImageStore, ANIMAL_IMAGES};
use vision::{VisionConfig, VisionPipeline};

/// Command line arguments
#[derive(Debug, Parser)]
#[command(author, version, about = "Look into the camera for your spirit animal", long_about = None)]
struct Cli {
    /// ONNX face detection model (UltraFace RFB-320)
    #[arg(long, default_value = "models/version-RFB-320.onnx")]
    model: PathBuf,

    /// Directory holding the animal PNGs
    #[arg(long, default_value = "animal_images")]
    images_dir: PathBuf,

    /// Camera index
    #[arg(long, default_value_t = 0)]
    camera_index: u32,

    /// Capture width in pixels, 0 keeps the camera default
    #[arg(long, default_value_t = 0)]
    camera_width: u32,

    /// Capture height in pixels, 0 keeps the camera default
    #[arg(long, default_value_t = 0)]
    camera_height: u32,

    /// Seconds each suggestion stays on screen
    #[arg(long, default_value_t = 3.0)]
    display_duration: f64,

    /// Face confidence threshold
    #[arg(long, default_value_t = 0.7)]
    score: f32,

    /// NMS IoU threshold
    #[arg(long, default_value_t = 0.3)]
    nms: f32,

    /// Smallest face side in pixels
    #[arg(long, default_value_t = 100)]
    min_face_size: u32,

    /// Seed for the suggestion picker, random when omitted
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let display_duration = parse_display_duration(cli.display_duration)?;

    // images load before the detector and the camera
    let store = ImageStore::load(&cli.images_dir, ANIMAL_IMAGES)?;
    if !store.warnings().is_empty() {
        warn!(
            skipped = store.warnings().len(),
            "some images could not be loaded, ensure they exist in {}",
            cli.images_dir.display()
        );
    }
    info!(loaded = store.len(), "animal images ready");

    let detector = OnnxFaceDetector::new(DetectorConfig {
        model_path: cli.model,
        score_threshold: cli.score,
        nms_threshold: cli.nms,
        min_face_size: cli.min_face_size,
    })?;

    let cfg = VisionConfig {
        camera_index: cli.camera_index,
        frame_width: cli.camera_width,
        frame_height: cli.camera_height,
        display_duration,
        seed: cli.seed,
    };
    let pipeline = VisionPipeline::new(cfg, store, Box::new(detector))
        .context("failed to start webcam preview")?;

    println!("Webcam initialized! Look into the camera for your spirit animal!");
    println!("Press 'q' to quit.");
    pipeline.run()?;
    Ok(())
}

/// Rejects zero, negative, non-finite and out-of-range values.
fn parse_display_duration(secs: f64) -> Result<Duration> {
    match Duration::try_from_secs_f64(secs) {
        Ok(duration) if !duration.is_zero() => Ok(duration),
        _ => bail!("--display-duration must be a positive number of seconds, got {secs}"),
    }
}
