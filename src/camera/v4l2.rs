use super::Capture;
use crate::common::config::CameraConfig;
use crate::common::{FaceUnlockError, Result};
use async_trait::async_trait;
use image::{DynamicImage, ImageBuffer, ImageOutputFormat, Luma};
use std::io::Cursor;
use std::time::Duration;
use v4l::buffer::Type;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture as _;
use v4l::{Device, FourCC};

/// Grabs a frame straight from `/dev/video<N>`.
///
/// The device is opened per capture so a wedged camera never outlives the
/// attempt that hit it.
#[derive(Debug, Clone)]
pub struct V4lCamera {
    config: CameraConfig,
}

impl V4lCamera {
    pub fn new(config: &CameraConfig) -> Self {
        Self { config: config.clone() }
    }

    fn grab(config: &CameraConfig) -> Result<Vec<u8>> {
        let device = Device::new(config.device_index as usize)
            .map_err(|e| FaceUnlockError::Camera(format!("Failed to open camera {}: {}", config.device_index, e)))?;

        let mut fmt = device.format()
            .map_err(|e| FaceUnlockError::Camera(format!("Failed to get format: {}", e)))?;
        fmt.width = config.width;
        fmt.height = config.height;

        // Keep GREY format for IR cameras, otherwise ask for MJPG
        if fmt.fourcc.repr != *b"GREY" {
            fmt.fourcc = FourCC::new(b"MJPG");
        }
        if let Err(e) = device.set_format(&fmt) {
            tracing::warn!("Could not set exact format: {}. Using device defaults.", e);
        }

        let fmt = device.format()
            .map_err(|e| FaceUnlockError::Camera(format!("Failed to get final format: {}", e)))?;
        if fmt.width != config.width || fmt.height != config.height {
            tracing::debug!(
                "Camera resolution {}x{} differs from requested {}x{}",
                fmt.width, fmt.height, config.width, config.height
            );
        }

        let mut stream = v4l::io::mmap::Stream::with_buffers(&device, Type::VideoCapture, 4)
            .map_err(|e| FaceUnlockError::Camera(format!("Failed to create stream: {}", e)))?;

        // Warmup frames let exposure and the IR emitter settle
        let delay = config.settle() / config.warmup_frames.max(1);
        for _ in 0..config.warmup_frames {
            stream.next()
                .map_err(|e| FaceUnlockError::Camera(format!("Failed to capture warmup frame: {}", e)))?;
            std::thread::sleep(delay);
        }

        let (buf, _meta) = stream.next()
            .map_err(|e| FaceUnlockError::Camera(format!("Failed to capture: {}", e)))?;

        match &fmt.fourcc.repr {
            b"GREY" => grey_to_png(buf, fmt.width, fmt.height),
            b"MJPG" => Ok(buf.to_vec()),
            other => Err(FaceUnlockError::Camera(format!(
                "Unsupported pixel format {}",
                String::from_utf8_lossy(other)
            ))),
        }
    }
}

fn grey_to_png(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let pixels = (width * height) as usize;
    if data.len() < pixels {
        return Err(FaceUnlockError::Camera(format!(
            "Short frame: {} bytes for {}x{}", data.len(), width, height
        )));
    }
    let buffer = ImageBuffer::<Luma<u8>, _>::from_raw(width, height, data[..pixels].to_vec())
        .ok_or_else(|| FaceUnlockError::Camera("Failed to create grayscale image buffer".into()))?;

    let mut encoded = Vec::new();
    DynamicImage::ImageLuma8(buffer).write_to(&mut Cursor::new(&mut encoded), ImageOutputFormat::Png)?;
    Ok(encoded)
}

#[async_trait]
impl Capture for V4lCamera {
    async fn capture(&self) -> Result<Vec<u8>> {
        let config = self.config.clone();
        let timeout: Duration = config.timeout();
        let grab = tokio::task::spawn_blocking(move || Self::grab(&config));

        match tokio::time::timeout(timeout, grab).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(FaceUnlockError::Camera(format!("Capture task failed: {}", e))),
            Err(_) => Err(FaceUnlockError::Camera(format!(
                "Camera {} did not deliver a frame within {:?}", self.config.device_index, timeout
            ))),
        }
    }
}
