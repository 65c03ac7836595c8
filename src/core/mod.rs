pub mod cooldown;
pub mod encoder;
pub mod gate;
pub mod matcher;
pub mod orchestrator;
pub mod stats;

pub use cooldown::CooldownPolicy;
pub use encoder::{FaceEncoder, OnnxFaceEncoder};
pub use gate::{AttemptGate, AttemptPermit};
pub use matcher::{match_identity, Embedding, GalleryEntry, MatchResult};
pub use orchestrator::{AttemptResult, MatchSettings, Orchestrator, OrchestratorState};
pub use stats::{AttemptOutcome, AttemptRecord, AttemptStats, TriggerSource};
