// Core modules
pub mod core;
pub mod camera;
pub mod storage;
pub mod service;
pub mod triggers;
pub mod common;

// Re-export commonly used types
pub use common::{Config, FaceUnlockError, Paths, Result};
pub use core::{
    AttemptOutcome, AttemptRecord, AttemptResult, AttemptStats, Embedding, FaceEncoder,
    GalleryEntry, MatchResult, Orchestrator, TriggerSource,
};
pub use camera::Capture;
pub use storage::{AttemptJournal, Gallery};
pub use service::{UnlockClient, UnlockOutcome};
pub use triggers::{AttemptTrigger, TriggerOutcome};
