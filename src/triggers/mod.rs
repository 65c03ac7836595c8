//! Trigger sources. Each one asks the shared [`Orchestrator`] for an attempt
//! through [`AttemptTrigger`] and reports a definite success flag and message.
//!
//! [`Orchestrator`]: crate::core::Orchestrator

pub mod button;
pub mod http;
pub mod timer;

pub use button::{ButtonEvent, ButtonTrigger};
pub use http::{create_router, AppState, HttpTrigger};
pub use timer::TimerTrigger;

use crate::core::{AttemptResult, AttemptRecord, TriggerSource};
use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait AttemptTrigger: Send + Sync {
    fn source(&self) -> TriggerSource;

    async fn invoke(&self) -> TriggerOutcome;
}

#[derive(Debug, Clone, PartialEq)]
pub enum TriggerOutcome {
    Attempted(AttemptRecord),
    /// Another attempt held the gate.
    Busy,
    /// Automatic attempts are suppressed after a recent success.
    CoolingDown { remaining: Duration },
    /// The caller stopped waiting. The attempt itself still runs to completion.
    TimedOut,
    /// The attempt task died before producing a record.
    Aborted { reason: String },
}

impl TriggerOutcome {
    pub fn success(&self) -> bool {
        matches!(self, TriggerOutcome::Attempted(record) if record.outcome.is_success())
    }

    pub fn record(&self) -> Option<&AttemptRecord> {
        match self {
            TriggerOutcome::Attempted(record) => Some(record),
            _ => None,
        }
    }

    pub fn message(&self) -> String {
        match self {
            TriggerOutcome::Attempted(record) => record.summary(),
            TriggerOutcome::Busy => "An attempt is already in progress, try again shortly".to_string(),
            TriggerOutcome::CoolingDown { remaining } => {
                format!("Cooling down after a successful unlock ({}s remaining)", remaining.as_secs())
            }
            TriggerOutcome::TimedOut => "Attempt timed out".to_string(),
            TriggerOutcome::Aborted { reason } => format!("Attempt failed: {}", reason),
        }
    }
}

impl From<AttemptResult> for TriggerOutcome {
    fn from(result: AttemptResult) -> Self {
        match result {
            AttemptResult::Busy => TriggerOutcome::Busy,
            AttemptResult::Completed(record) => TriggerOutcome::Attempted(record),
        }
    }
}
