use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use crate::service::UnlockOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    Timer,
    Button,
    Http,
    Cli,
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TriggerSource::Timer => "timer",
            TriggerSource::Button => "button",
            TriggerSource::Http => "http",
            TriggerSource::Cli => "cli",
        };
        f.write_str(name)
    }
}

/// Terminal state of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    NoFace,
    NoMatch,
    LowConfidence,
    CaptureFailed,
    UnlockFailed,
}

impl AttemptOutcome {
    pub fn is_success(self) -> bool {
        matches!(self, AttemptOutcome::Success)
    }

    pub fn describe(self) -> &'static str {
        match self {
            AttemptOutcome::Success => "recognized",
            AttemptOutcome::NoFace => "no face detected",
            AttemptOutcome::NoMatch => "no authorized user recognized",
            AttemptOutcome::LowConfidence => "match confidence too low",
            AttemptOutcome::CaptureFailed => "capture failed",
            AttemptOutcome::UnlockFailed => "unlock failed",
        }
    }
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// One line of history per completed attempt. Never modified once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub timestamp: DateTime<Local>,
    pub source: TriggerSource,
    pub outcome: AttemptOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unlock: Option<UnlockOutcome>,
}

impl AttemptRecord {
    pub fn new(source: TriggerSource, outcome: AttemptOutcome) -> Self {
        Self {
            timestamp: Local::now(),
            source,
            outcome,
            identity: None,
            confidence: None,
            unlock: None,
        }
    }

    pub fn with_identity(mut self, identity: impl Into<String>, confidence: f32) -> Self {
        self.identity = Some(identity.into());
        self.confidence = Some(confidence);
        self
    }

    pub fn with_unlock(mut self, unlock: UnlockOutcome) -> Self {
        self.unlock = Some(unlock);
        self
    }

    /// Human readable summary used by the event log and trigger replies.
    pub fn summary(&self) -> String {
        let mut line = match (&self.identity, self.confidence) {
            (Some(identity), Some(confidence)) if self.outcome.is_success() => {
                format!("Recognized {} ({:.1}%)", identity, confidence * 100.0)
            }
            (Some(identity), Some(confidence)) => {
                format!("{}: {} ({:.1}%)", capitalize(self.outcome.describe()), identity, confidence * 100.0)
            }
            _ => capitalize(self.outcome.describe()),
        };
        if let Some(unlock) = &self.unlock {
            line.push_str(&format!(", unlock {}", unlock));
        }
        line.push_str(&format!(" [{}]", self.source));
        line
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Process-wide attempt counters.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptStats {
    pub total_attempts: u64,
    pub successful: u64,
    pub failed: u64,
    pub started_at: DateTime<Local>,
    pub last_attempt: Option<AttemptRecord>,
}

impl Default for AttemptStats {
    fn default() -> Self {
        Self {
            total_attempts: 0,
            successful: 0,
            failed: 0,
            started_at: Local::now(),
            last_attempt: None,
        }
    }
}

impl AttemptStats {
    pub fn record(&mut self, record: &AttemptRecord) {
        self.total_attempts += 1;
        if record.outcome.is_success() {
            self.successful += 1;
        } else {
            self.failed += 1;
        }
        self.last_attempt = Some(record.clone());
    }

    /// Percentage of attempts that ended in success.
    pub fn success_rate(&self) -> f64 {
        if self.total_attempts == 0 {
            0.0
        } else {
            self.successful as f64 / self.total_attempts as f64 * 100.0
        }
    }

    pub fn report(&self) -> String {
        let runtime = Local::now() - self.started_at;
        format!(
            "Runtime: {}h {}m {}s | Attempts: {} | Successful: {} | Failed: {} | Success rate: {:.1}%",
            runtime.num_hours(),
            runtime.num_minutes() % 60,
            runtime.num_seconds() % 60,
            self.total_attempts,
            self.successful,
            self.failed,
            self.success_rate(),
        )
    }
}
