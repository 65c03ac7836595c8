pub mod command;
pub mod v4l2;

pub use command::CommandCamera;
pub use v4l2::V4lCamera;

use crate::common::config::{CameraConfig, CaptureBackend};
use crate::common::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

/// Source of still images for recognition.
///
/// Implementations must give up within their own timeout; the orchestrator
/// turns every error into a `capture_failed` attempt.
#[async_trait]
pub trait Capture: Send + Sync {
    async fn capture(&self) -> Result<Vec<u8>>;
}

pub fn from_config(config: &CameraConfig) -> Arc<dyn Capture> {
    match config.backend {
        CaptureBackend::Rpicam => Arc::new(CommandCamera::new(config)),
        CaptureBackend::V4l2 => Arc::new(V4lCamera::new(config)),
    }
}

/// Takes one still and writes it to `output`, or to `still.<ext>` in the
/// working directory with the extension of the captured format. Returns the
/// path written and its size.
pub async fn save_still(capture: &dyn Capture, output: Option<PathBuf>) -> Result<(PathBuf, usize)> {
    let image = capture.capture().await?;
    let path = still_path(output, &image);

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&path, &image).await?;
    Ok((path, image.len()))
}

fn still_path(output: Option<PathBuf>, image: &[u8]) -> PathBuf {
    output.unwrap_or_else(|| {
        let extension = image::guess_format(image)
            .ok()
            .and_then(|format| format.extensions_str().first().copied())
            .unwrap_or("bin");
        PathBuf::from(format!("still.{}", extension))
    })
}
