use super::Capture;
use crate::common::config::CameraConfig;
use crate::common::{FaceUnlockError, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;

/// Takes a still by running an external capture tool (rpicam-jpeg on a
/// Raspberry Pi) that writes the JPEG to stdout.
#[derive(Debug, Clone)]
pub struct CommandCamera {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandCamera {
    pub fn new(config: &CameraConfig) -> Self {
        let args = vec![
            "-o".to_string(),
            "-".to_string(),
            "--width".to_string(),
            config.width.to_string(),
            "--height".to_string(),
            config.height.to_string(),
            "-t".to_string(),
            config.settle_ms.to_string(),
            "-n".to_string(),
        ];
        Self::with_args(&config.command, args, config.timeout())
    }

    pub fn with_args(program: &str, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.to_string(),
            args,
            timeout,
        }
    }
}

#[async_trait]
impl Capture for CommandCamera {
    async fn capture(&self) -> Result<Vec<u8>> {
        let mut command = Command::new(&self.program);
        command.args(&self.args).kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| FaceUnlockError::Camera(format!(
                "{} did not finish within {:?}", self.program, self.timeout
            )))?
            .map_err(|e| FaceUnlockError::Camera(format!("Failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FaceUnlockError::Camera(format!(
                "{} exited with {}: {}", self.program, output.status, stderr.trim()
            )));
        }
        if output.stdout.is_empty() {
            return Err(FaceUnlockError::Camera(format!("{} produced no image", self.program)));
        }

        tracing::debug!("Captured {} bytes with {}", output.stdout.len(), self.program);
        Ok(output.stdout)
    }
}
