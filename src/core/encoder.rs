//! Face detection and embedding extraction.
//!
//! The orchestrator only depends on [`FaceEncoder`]. [`OnnxFaceEncoder`] is
//! the bundled implementation: a YOLO-style face detector followed by an
//! embedding network, both run through ONNX Runtime.

use crate::common::config::EncoderConfig;
use crate::common::{FaceUnlockError, Result};
use crate::core::matcher::Embedding;
use image::{imageops::FilterType, DynamicImage};
use ndarray::{Array4, CowArray};
use ort::{Environment, GraphOptimizationLevel, Session, SessionBuilder, Value};
use std::path::Path;
use std::sync::Arc;

/// Turns one captured image into zero or more face embeddings.
pub trait FaceEncoder: Send + Sync {
    fn encode(&self, image: &[u8]) -> Result<Vec<Embedding>>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct FaceBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
}

impl FaceBox {
    fn area(&self) -> f32 {
        (self.x2 - self.x1) * (self.y2 - self.y1)
    }

    fn iou(&self, other: &FaceBox) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }
}

pub struct OnnxFaceEncoder {
    detector: Session,
    recognizer: Session,
    _environment: Arc<Environment>,
    config: EncoderConfig,
}

impl OnnxFaceEncoder {
    pub fn new(config: &EncoderConfig) -> Result<Self> {
        let environment = Arc::new(
            Environment::builder()
                .with_name("face_unlock")
                .build()
                .map_err(|e| FaceUnlockError::Model(format!("Failed to create environment: {}", e)))?,
        );

        let detector = load_session(&environment, &config.detector_path, config.optimization_level)?;
        let recognizer = load_session(&environment, &config.recognizer_path, config.optimization_level)?;

        Ok(Self {
            detector,
            recognizer,
            _environment: environment,
            config: config.clone(),
        })
    }

    pub fn detect(&self, image: &DynamicImage) -> Result<Vec<FaceBox>> {
        let (input_w, input_h) = (self.config.detector_input_width, self.config.detector_input_height);
        let orig_width = image.width() as f32;
        let orig_height = image.height() as f32;

        let img_array = if image.width() == input_w && image.height() == input_h {
            detector_input(image)
        } else {
            detector_input(&image.resize_exact(input_w, input_h, FilterType::Nearest))
        };

        let cow_array = CowArray::from(img_array.into_dyn());
        let input_tensor = Value::from_array(self.detector.allocator(), &cow_array)?;
        let outputs = self.detector.run(vec![input_tensor])?;
        let Some(output) = outputs.first() else {
            return Ok(Vec::new());
        };
        let output = output.try_extract::<f32>()?;
        let view = output.view();
        let shape = view.shape().to_vec();
        let data: Vec<f32> = view.iter().copied().collect();

        let mut faces = parse_detections(&data, &shape, input_w as f32, input_h as f32);
        faces = apply_nms(faces, 0.45);
        faces.retain(|face| face.confidence >= self.config.detection_confidence);
        faces.truncate(self.config.max_faces);

        // Scale coordinates back to original image dimensions
        let scale_x = orig_width / input_w as f32;
        let scale_y = orig_height / input_h as f32;
        for face in &mut faces {
            face.x1 *= scale_x;
            face.x2 *= scale_x;
            face.y1 *= scale_y;
            face.y2 *= scale_y;
        }

        Ok(faces)
    }

    pub fn embed(&self, image: &DynamicImage, face: &FaceBox) -> Result<Embedding> {
        let x = face.x1.max(0.0) as u32;
        let y = face.y1.max(0.0) as u32;
        let width = (face.x2 - face.x1).max(1.0) as u32;
        let height = (face.y2 - face.y1).max(1.0) as u32;

        let size = self.config.recognizer_input_size;
        let face_img = image.crop_imm(x, y, width, height).resize_exact(size, size, FilterType::Triangle);

        let input_array = recognizer_input(&face_img, self.config.normalization_value);
        let cow_array = CowArray::from(input_array.into_dyn());
        let input_tensor = Value::from_array(self.recognizer.allocator(), &cow_array)?;
        let outputs = self.recognizer.run(vec![input_tensor])?;

        let output = outputs
            .first()
            .ok_or_else(|| FaceUnlockError::Model("Recognizer produced no output".into()))?;
        let embedding: Embedding = output.try_extract::<f32>()?.view().iter().copied().collect();
        Ok(l2_normalize(embedding))
    }
}

impl FaceEncoder for OnnxFaceEncoder {
    fn encode(&self, image: &[u8]) -> Result<Vec<Embedding>> {
        let image = image::load_from_memory(image)?;
        let faces = self.detect(&image)?;
        tracing::debug!("Detected {} face(s)", faces.len());

        faces.iter().map(|face| self.embed(&image, face)).collect()
    }
}

fn load_session(environment: &Arc<Environment>, model_path: &Path, optimization_level: u32) -> Result<Session> {
    if !model_path.exists() {
        return Err(FaceUnlockError::Model(format!("Model not found at: {:?}", model_path)));
    }

    let opt_level = match optimization_level {
        0 => GraphOptimizationLevel::Disable,
        1 => GraphOptimizationLevel::Level1,
        2 => GraphOptimizationLevel::Level2,
        _ => GraphOptimizationLevel::Level3,
    };

    let session = SessionBuilder::new(environment)?
        .with_optimization_level(opt_level)?
        .with_model_from_file(model_path)?;
    Ok(session)
}

/// Grayscale replicated to three channels, scaled to [0, 1].
fn detector_input(img: &DynamicImage) -> Array4<f32> {
    let gray = img.to_luma8();
    let (width, height) = (gray.width() as usize, gray.height() as usize);
    let mut array = Array4::<f32>::zeros((1, 3, height, width));

    for (x, y, pixel) in gray.enumerate_pixels() {
        let value = pixel[0] as f32 / 255.0;
        for channel in 0..3 {
            array[[0, channel, y as usize, x as usize]] = value;
        }
    }
    array
}

/// Single-channel input centred on `norm`.
fn recognizer_input(img: &DynamicImage, norm: f32) -> Array4<f32> {
    let gray = img.to_luma8();
    let (width, height) = (gray.width() as usize, gray.height() as usize);
    let mut array = Array4::<f32>::zeros((1, 1, height, width));

    for (x, y, pixel) in gray.enumerate_pixels() {
        array[[0, 0, y as usize, x as usize]] = (pixel[0] as f32 - norm) / norm;
    }
    array
}

/// Decodes raw detector output of shape `[1, N, 5+]` or the transposed `[1, 5+, N]`.
pub fn parse_detections(data: &[f32], shape: &[usize], input_w: f32, input_h: f32) -> Vec<FaceBox> {
    let (num_predictions, prediction_length, transposed) = match shape {
        // Fields on the middle axis, e.g. [1, 5, 8400]
        [_, a, b] if a < b && *b > 16 => (*b, *a, true),
        [_, a, b] => (*a, *b, false),
        [a, b] => (*a, *b, false),
        _ => {
            tracing::warn!("Unexpected detector output shape: {:?}", shape);
            return Vec::new();
        }
    };
    if prediction_length < 4 || data.len() < num_predictions * prediction_length {
        tracing::warn!("Detector output too small for shape {:?}", shape);
        return Vec::new();
    }

    let at = |i: usize, field: usize| {
        if transposed {
            data[field * num_predictions + i]
        } else {
            data[i * prediction_length + field]
        }
    };

    let mut faces = Vec::new();
    for i in 0..num_predictions {
        let confidence = if prediction_length > 4 { at(i, 4) } else { 0.0 };
        if confidence <= 0.001 {
            continue;
        }

        let (cx, cy, w, h) = (at(i, 0), at(i, 1), at(i, 2), at(i, 3));
        // Normalized coordinates need scaling to pixels
        let scale = if cx > 1.0 || cy > 1.0 || w > 1.0 || h > 1.0 { 1.0 } else { input_w };
        let (cx, cy, w, h) = (cx * scale, cy * scale, w * scale, h * scale);

        let x1 = (cx - w / 2.0).max(0.0);
        let y1 = (cy - h / 2.0).max(0.0);
        let x2 = (cx + w / 2.0).min(input_w);
        let y2 = (cy + h / 2.0).min(input_h);

        // Skip degenerate or tiny boxes
        if x2 - x1 > 10.0 && y2 - y1 > 10.0 {
            faces.push(FaceBox { x1, y1, x2, y2, confidence });
        }
    }
    faces
}

/// Greedy non-maximum suppression, highest confidence first.
pub fn apply_nms(mut boxes: Vec<FaceBox>, iou_threshold: f32) -> Vec<FaceBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<FaceBox> = Vec::new();
    for candidate in boxes {
        if keep.iter().all(|kept| kept.iou(&candidate) < iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

pub fn l2_normalize(mut embedding: Embedding) -> Embedding {
    let norm = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut embedding {
            *value /= norm;
        }
    }
    embedding
}
