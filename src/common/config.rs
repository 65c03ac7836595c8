use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::common::error::{FaceUnlockError, Result};

/// Shared key the remote unlock agent expects unless configured otherwise.
pub const DEFAULT_UNLOCK_KEY: &str = "face_unlock_2024";

/// Tolerance used when neither the config nor the gallery provides one.
pub const DEFAULT_TOLERANCE: f32 = 0.4;

/// Shortest monitoring interval accepted, in seconds.
pub const MIN_CHECK_INTERVAL_SECS: f64 = 0.1;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub recognition: RecognitionConfig,
    #[serde(default)]
    pub unlock: UnlockConfig,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub button: ButtonConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CaptureBackend {
    /// Still capture through an external command (rpicam-jpeg by default).
    Rpicam,
    /// Direct frame grab from a V4L2 device.
    V4l2,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CameraConfig {
    #[serde(default = "default_backend")]
    pub backend: CaptureBackend,
    #[serde(default = "default_command")]
    pub command: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    /// Delay before the still is taken, lets exposure settle.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    /// Hard limit for a single capture.
    #[serde(default = "default_capture_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub device_index: u32,
    #[serde(default = "default_warmup_frames")]
    pub warmup_frames: u32,
}

fn default_backend() -> CaptureBackend { CaptureBackend::Rpicam }
fn default_command() -> String { "rpicam-jpeg".to_string() }
fn default_width() -> u32 { 1296 }
fn default_height() -> u32 { 972 }
fn default_settle_ms() -> u64 { 500 }
fn default_capture_timeout() -> u64 { 5 }
fn default_warmup_frames() -> u32 { 3 }

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            command: default_command(),
            width: default_width(),
            height: default_height(),
            settle_ms: default_settle_ms(),
            timeout_secs: default_capture_timeout(),
            device_index: 0,
            warmup_frames: default_warmup_frames(),
        }
    }
}

impl CameraConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EncoderConfig {
    #[serde(default = "default_detector_path")]
    pub detector_path: PathBuf,
    #[serde(default = "default_recognizer_path")]
    pub recognizer_path: PathBuf,
    #[serde(default = "default_detector_input")]
    pub detector_input_width: u32,
    #[serde(default = "default_detector_input")]
    pub detector_input_height: u32,
    #[serde(default = "default_detection_confidence")]
    pub detection_confidence: f32,
    #[serde(default = "default_recognizer_input")]
    pub recognizer_input_size: u32,
    #[serde(default = "default_normalization")]
    pub normalization_value: f32,
    #[serde(default = "default_optimization_level")]
    pub optimization_level: u32,
    /// Upper bound on faces encoded per capture.
    #[serde(default = "default_max_faces")]
    pub max_faces: usize,
}

fn default_detector_path() -> PathBuf { PathBuf::from("models/detector.onnx") }
fn default_recognizer_path() -> PathBuf { PathBuf::from("models/recognizer.onnx") }
fn default_detector_input() -> u32 { 640 }
fn default_detection_confidence() -> f32 { 0.5 }
fn default_recognizer_input() -> u32 { 112 }
fn default_normalization() -> f32 { 127.5 }
fn default_optimization_level() -> u32 { 3 }
fn default_max_faces() -> usize { 5 }

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            detector_path: default_detector_path(),
            recognizer_path: default_recognizer_path(),
            detector_input_width: default_detector_input(),
            detector_input_height: default_detector_input(),
            detection_confidence: default_detection_confidence(),
            recognizer_input_size: default_recognizer_input(),
            normalization_value: default_normalization(),
            optimization_level: default_optimization_level(),
            max_faces: default_max_faces(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RecognitionConfig {
    /// Falls back to the gallery's recommended tolerance when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<f32>,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: f64,
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
    /// Empty means every identity in the gallery is authorized.
    #[serde(default)]
    pub authorized_users: Vec<String>,
}

fn default_confidence_threshold() -> f32 { 0.6 }
fn default_check_interval() -> f64 { 3.0 }
fn default_cooldown() -> u64 { 30 }

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            tolerance: None,
            confidence_threshold: default_confidence_threshold(),
            check_interval_secs: default_check_interval(),
            cooldown_secs: default_cooldown(),
            authorized_users: Vec::new(),
        }
    }
}

impl RecognitionConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs_f64(self.check_interval_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UnlockConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_key")]
    pub key: String,
    #[serde(default = "default_unlock_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
}

fn default_host() -> String { "localhost".to_string() }
fn default_port() -> u16 { 5001 }
fn default_key() -> String { DEFAULT_UNLOCK_KEY.to_string() }
fn default_unlock_timeout() -> u64 { 15 }
fn default_probe_timeout() -> u64 { 2 }

impl Default for UnlockConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_host(),
            port: default_port(),
            key: default_key(),
            timeout_secs: default_unlock_timeout(),
            probe_timeout_secs: default_probe_timeout(),
        }
    }
}

impl UnlockConfig {
    pub fn endpoint(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WebConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    /// Outer limit the HTTP trigger waits for an attempt before answering.
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_secs: u64,
}

fn default_listen_addr() -> SocketAddr { SocketAddr::from(([0, 0, 0, 0], 5000)) }
fn default_attempt_timeout() -> u64 { 30 }

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            attempt_timeout_secs: default_attempt_timeout(),
        }
    }
}

impl WebConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ButtonConfig {
    #[serde(default = "default_debounce")]
    pub debounce_ms: u64,
}

fn default_debounce() -> u64 { 300 }

impl Default for ButtonConfig {
    fn default() -> Self {
        Self { debounce_ms: default_debounce() }
    }
}

impl ButtonConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_gallery_path")]
    pub gallery_path: PathBuf,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    #[serde(default = "default_access_log")]
    pub access_log: PathBuf,
}

fn default_gallery_path() -> PathBuf { PathBuf::from("models/face_model.bin") }
fn default_log_dir() -> PathBuf { PathBuf::from("logs") }
fn default_access_log() -> PathBuf { PathBuf::from("access_log.json") }

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            gallery_path: default_gallery_path(),
            log_dir: default_log_dir(),
            access_log: default_access_log(),
        }
    }
}

impl Config {
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(FaceUnlockError::Config(format!(
                "Config file not found: {}. Please create it from configs/face-unlock.toml",
                path.display()
            )));
        }

        tracing::info!("Loading config from: {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)
            .map_err(|e| FaceUnlockError::Config(format!("Config parse error: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Resolves relative paths in the config against `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        for path in [
            &mut self.encoder.detector_path,
            &mut self.encoder.recognizer_path,
            &mut self.storage.gallery_path,
            &mut self.storage.log_dir,
            &mut self.storage.access_log,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.camera.width == 0 || self.camera.width > 4096 {
            return Err(FaceUnlockError::Config(format!(
                "Camera width must be between 1 and 4096, got {}", self.camera.width
            )));
        }
        if self.camera.height == 0 || self.camera.height > 4096 {
            return Err(FaceUnlockError::Config(format!(
                "Camera height must be between 1 and 4096, got {}", self.camera.height
            )));
        }
        if self.camera.timeout_secs == 0 || self.camera.timeout_secs > 60 {
            return Err(FaceUnlockError::Config(format!(
                "Capture timeout must be between 1 and 60 seconds, got {}",
                self.camera.timeout_secs
            )));
        }
        if self.camera.backend == CaptureBackend::Rpicam && self.camera.command.trim().is_empty() {
            return Err(FaceUnlockError::Config("Capture command must not be empty".into()));
        }

        if let Some(tolerance) = self.recognition.tolerance {
            if !(tolerance > 0.0 && tolerance <= 2.0) {
                return Err(FaceUnlockError::Config(format!(
                    "Tolerance must be in (0.0, 2.0], got {}", tolerance
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.recognition.confidence_threshold) {
            return Err(FaceUnlockError::Config(format!(
                "Confidence threshold must be between 0.0 and 1.0, got {}",
                self.recognition.confidence_threshold
            )));
        }
        if !(self.recognition.check_interval_secs >= MIN_CHECK_INTERVAL_SECS
            && self.recognition.check_interval_secs.is_finite())
        {
            return Err(FaceUnlockError::Config(format!(
                "Check interval must be at least {} seconds, got {}",
                MIN_CHECK_INTERVAL_SECS, self.recognition.check_interval_secs
            )));
        }
        if self.recognition.authorized_users.iter().any(|u| u.trim().is_empty()) {
            return Err(FaceUnlockError::Config("Authorized user names must not be empty".into()));
        }

        if !(0.0..=1.0).contains(&self.encoder.detection_confidence) {
            return Err(FaceUnlockError::Config(format!(
                "Detection confidence must be between 0.0 and 1.0, got {}",
                self.encoder.detection_confidence
            )));
        }
        if self.encoder.recognizer_input_size == 0 || self.encoder.recognizer_input_size > 1024 {
            return Err(FaceUnlockError::Config(format!(
                "Recognizer input size must be between 1 and 1024, got {}",
                self.encoder.recognizer_input_size
            )));
        }
        if self.encoder.detector_input_width == 0 || self.encoder.detector_input_height == 0 {
            return Err(FaceUnlockError::Config("Detector input size must be non-zero".into()));
        }

        if self.unlock.host.trim().is_empty() {
            return Err(FaceUnlockError::Config("Unlock host must not be empty".into()));
        }
        if self.unlock.key.is_empty() {
            return Err(FaceUnlockError::Config("Unlock key must not be empty".into()));
        }
        if self.unlock.timeout_secs == 0 || self.unlock.probe_timeout_secs == 0 {
            return Err(FaceUnlockError::Config("Unlock timeouts must be at least 1 second".into()));
        }

        if self.web.attempt_timeout_secs == 0 {
            return Err(FaceUnlockError::Config("Web attempt timeout must be at least 1 second".into()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_documented_defaults() {
        let config = Config::from_toml("").unwrap();

        assert_eq!(config.camera.backend, CaptureBackend::Rpicam);
        assert_eq!(config.camera.settle(), Duration::from_millis(500));
        assert_eq!(config.camera.timeout(), Duration::from_secs(5));
        assert_eq!(config.recognition.tolerance, None);
        assert_eq!(config.recognition.confidence_threshold, 0.6);
        assert_eq!(config.recognition.cooldown(), Duration::from_secs(30));
        assert!(!config.unlock.enabled);
        assert_eq!(config.unlock.key, DEFAULT_UNLOCK_KEY);
        assert_eq!(config.unlock.endpoint(), "http://localhost:5001");
        assert_eq!(config.web.attempt_timeout(), Duration::from_secs(30));
        assert_eq!(config.button.debounce(), Duration::from_millis(300));
    }

    #[test]
    fn sections_override_defaults() {
        let config = Config::from_toml(
            r#"
            [camera]
            backend = "v4l2"
            device_index = 2

            [recognition]
            tolerance = 0.45
            authorized_users = ["alice"]

            [unlock]
            enabled = true
            host = "192.168.1.100"
            "#,
        )
        .unwrap();

        assert_eq!(config.camera.backend, CaptureBackend::V4l2);
        assert_eq!(config.camera.device_index, 2);
        assert_eq!(config.recognition.tolerance, Some(0.45));
        assert_eq!(config.recognition.authorized_users, vec!["alice".to_string()]);
        assert_eq!(config.unlock.endpoint(), "http://192.168.1.100:5001");
    }

    #[test]
    fn bundled_config_parses() {
        let config = Config::from_toml(include_str!("../../configs/face-unlock.toml")).unwrap();
        assert_eq!(config.web.listen_addr, "0.0.0.0:5000".parse().unwrap());
        assert_eq!(config.storage.gallery_path, PathBuf::from("models/face_model.bin"));
    }

    #[test]
    fn defaults_round_trip_through_toml() {
        let text = toml::to_string_pretty(&Config::default()).unwrap();
        let config = Config::from_toml(&text).unwrap();
        assert_eq!(config.unlock.port, 5001);
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let err = Config::from_toml("[recognition]\nconfidence_threshold = 1.5\n").unwrap_err();
        assert!(matches!(err, FaceUnlockError::Config(_)));
    }

    #[test]
    fn rejects_non_positive_tolerance() {
        let err = Config::from_toml("[recognition]\ntolerance = 0.0\n").unwrap_err();
        assert!(matches!(err, FaceUnlockError::Config(_)));
    }

    #[test]
    fn rejects_sub_minimum_check_interval() {
        for interval in ["1e-12", "0.05", "0.0", "-3.0", "inf"] {
            let text = format!("[recognition]\ncheck_interval_secs = {}\n", interval);
            let err = Config::from_toml(&text).unwrap_err();
            assert!(matches!(err, FaceUnlockError::Config(_)), "accepted {}", interval);
        }
        let config = Config::from_toml("[recognition]\ncheck_interval_secs = 0.1\n").unwrap();
        assert_eq!(config.recognition.check_interval(), Duration::from_millis(100));
    }

    #[test]
    fn rejects_unknown_backend() {
        let err = Config::from_toml("[camera]\nbackend = \"webcam\"\n").unwrap_err();
        assert!(matches!(err, FaceUnlockError::Config(_)));
    }

    #[test]
    fn rejects_empty_unlock_key() {
        let err = Config::from_toml("[unlock]\nkey = \"\"\n").unwrap_err();
        assert!(matches!(err, FaceUnlockError::Config(_)));
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = Config::load_from_path(Path::new("/nonexistent/face-unlock.toml")).unwrap_err();
        assert!(matches!(err, FaceUnlockError::Config(_)));
    }

    #[test]
    fn relative_paths_resolve_against_base() {
        let mut config = Config::default();
        config.storage.log_dir = PathBuf::from("/var/log/faceunlock");
        config.resolve_paths(Path::new("/srv/faceunlock"));

        assert_eq!(config.storage.gallery_path, PathBuf::from("/srv/faceunlock/models/face_model.bin"));
        assert_eq!(config.storage.log_dir, PathBuf::from("/var/log/faceunlock"));
    }
}
