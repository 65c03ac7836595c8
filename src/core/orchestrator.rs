//! The attempt lifecycle: gate, capture, match, unlock, record, release.

use crate::camera::Capture;
use crate::common::config::Config;
use crate::common::Result;
use crate::core::cooldown::CooldownPolicy;
use crate::core::encoder::FaceEncoder;
use crate::core::gate::AttemptGate;
use crate::core::matcher::{match_identity, MatchResult};
use crate::core::stats::{AttemptOutcome, AttemptRecord, AttemptStats, TriggerSource};
use crate::service::{UnlockClient, UnlockOutcome};
use crate::storage::{AttemptJournal, Gallery};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// All mutable state shared between trigger sources.
#[derive(Debug, Default)]
pub struct OrchestratorState {
    pub gate: AttemptGate,
    pub cooldown: CooldownPolicy,
    stats: Mutex<AttemptStats>,
}

impl OrchestratorState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> AttemptStats {
        self.lock_stats().clone()
    }

    fn record(&self, record: &AttemptRecord) {
        self.lock_stats().record(record);
    }

    fn lock_stats(&self) -> MutexGuard<'_, AttemptStats> {
        self.stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchSettings {
    pub tolerance: f32,
    pub confidence_threshold: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttemptResult {
    /// Another attempt held the gate. Nothing was recorded.
    Busy,
    Completed(AttemptRecord),
}

impl AttemptResult {
    pub fn record(&self) -> Option<&AttemptRecord> {
        match self {
            AttemptResult::Busy => None,
            AttemptResult::Completed(record) => Some(record),
        }
    }
}

/// Attempts running on detached tasks.
#[derive(Debug, Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

struct InFlightGuard(Arc<InFlight>);

impl InFlightGuard {
    fn enter(in_flight: &Arc<InFlight>) -> Self {
        in_flight.count.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(in_flight))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

pub struct Orchestrator {
    state: Arc<OrchestratorState>,
    in_flight: Arc<InFlight>,
    capture: Arc<dyn Capture>,
    encoder: Arc<dyn FaceEncoder>,
    gallery: Arc<Gallery>,
    unlock: Option<UnlockClient>,
    journal: AttemptJournal,
    settings: MatchSettings,
}

impl Orchestrator {
    pub fn new(
        capture: Arc<dyn Capture>,
        encoder: Arc<dyn FaceEncoder>,
        gallery: Arc<Gallery>,
        unlock: Option<UnlockClient>,
        journal: AttemptJournal,
        settings: MatchSettings,
    ) -> Self {
        Self {
            state: Arc::new(OrchestratorState::new()),
            in_flight: Arc::new(InFlight::default()),
            capture,
            encoder,
            gallery,
            unlock,
            journal,
            settings,
        }
    }

    /// Wires the orchestrator from configuration. The configured tolerance
    /// overrides the one stored with the gallery.
    pub fn from_config(
        config: &Config,
        capture: Arc<dyn Capture>,
        encoder: Arc<dyn FaceEncoder>,
        gallery: Arc<Gallery>,
    ) -> Result<Self> {
        let unlock = if config.unlock.enabled {
            Some(UnlockClient::from_config(&config.unlock)?)
        } else {
            tracing::info!("Unlock disabled: running in recognition-only mode");
            None
        };

        let settings = MatchSettings {
            tolerance: config.recognition.tolerance.unwrap_or_else(|| gallery.tolerance()),
            confidence_threshold: config.recognition.confidence_threshold,
        };
        tracing::debug!(
            "Match settings: tolerance {:.3}, confidence threshold {:.3}",
            settings.tolerance,
            settings.confidence_threshold
        );

        Ok(Self::new(
            capture,
            encoder,
            gallery,
            unlock,
            AttemptJournal::from_config(&config.storage),
            settings,
        ))
    }

    pub fn state(&self) -> &Arc<OrchestratorState> {
        &self.state
    }

    pub fn settings(&self) -> MatchSettings {
        self.settings
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    pub fn is_processing(&self) -> bool {
        self.state.gate.is_busy()
    }

    pub fn stats(&self) -> AttemptStats {
        self.state.stats()
    }

    pub fn unlock_enabled(&self) -> bool {
        self.unlock.is_some()
    }

    /// Time left before automatic attempts resume, if a cooldown is running.
    pub fn cooldown_remaining(&self, cooldown: Duration) -> Option<Duration> {
        self.state.cooldown.remaining(Instant::now(), cooldown)
    }

    /// `None` when unlocking is disabled.
    pub async fn probe_unlock(&self) -> Option<bool> {
        match &self.unlock {
            Some(client) => Some(client.probe().await),
            None => None,
        }
    }

    /// Runs [`attempt`](Self::attempt) on its own task. The task is counted
    /// until it finishes so shutdown can wait for it with
    /// [`wait_for_attempts`](Self::wait_for_attempts).
    pub fn spawn_attempt(self: &Arc<Self>, source: TriggerSource) -> JoinHandle<AttemptResult> {
        let guard = InFlightGuard::enter(&self.in_flight);
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            let _guard = guard;
            orchestrator.attempt(source).await
        })
    }

    pub fn attempts_in_flight(&self) -> usize {
        self.in_flight.count.load(Ordering::SeqCst)
    }

    /// Resolves once no spawned attempt is running.
    pub async fn wait_for_attempts(&self) {
        loop {
            let idle = self.in_flight.idle.notified();
            if self.attempts_in_flight() == 0 {
                return;
            }
            idle.await;
        }
    }

    /// Runs one attempt if no other attempt is in flight.
    pub async fn attempt(&self, source: TriggerSource) -> AttemptResult {
        let Some(permit) = self.state.gate.try_acquire() else {
            tracing::debug!("Attempt from {} skipped: another attempt is running", source);
            return AttemptResult::Busy;
        };

        let record = self.run(source).await;

        self.state.record(&record);
        self.journal.append(&record).await;
        log_record(&record);

        permit.release();
        AttemptResult::Completed(record)
    }

    async fn run(&self, source: TriggerSource) -> AttemptRecord {
        tracing::debug!("Attempt started by {}", source);

        let image = match self.capture.capture().await {
            Ok(image) => image,
            Err(e) => {
                tracing::warn!("Capture failed: {}", e);
                return AttemptRecord::new(source, AttemptOutcome::CaptureFailed);
            }
        };

        let encoder = Arc::clone(&self.encoder);
        let candidates = match tokio::task::spawn_blocking(move || encoder.encode(&image)).await {
            Ok(Ok(candidates)) => candidates,
            Ok(Err(e)) => {
                tracing::warn!("Face extraction failed: {}", e);
                return AttemptRecord::new(source, AttemptOutcome::CaptureFailed);
            }
            Err(e) => {
                tracing::warn!("Face extraction task failed: {}", e);
                return AttemptRecord::new(source, AttemptOutcome::CaptureFailed);
            }
        };

        let result = match_identity(
            &candidates,
            self.gallery.entries(),
            self.settings.tolerance,
            self.settings.confidence_threshold,
        );
        tracing::debug!(
            "Match: {} face(s), best {} at distance {:.3}",
            result.faces,
            result.identity,
            result.distance
        );

        if !result.accepted {
            return rejected(source, &result);
        }

        let record = AttemptRecord::new(source, AttemptOutcome::Success)
            .with_identity(result.identity.clone(), result.confidence);

        let Some(client) = &self.unlock else {
            self.state.cooldown.record_success(Instant::now());
            return record;
        };

        let outcome = client.unlock(&result.identity).await;
        match &outcome {
            UnlockOutcome::TimedOutButLikelySucceeded => {
                tracing::warn!(
                    "Unlock for {} timed out; treating as success (the agent may still unlock)",
                    result.identity
                );
            }
            UnlockOutcome::Denied => {
                tracing::warn!("Unlock for {} was denied", result.identity);
            }
            _ => {}
        }

        if outcome.counts_as_success() {
            self.state.cooldown.record_success(Instant::now());
            record.with_unlock(outcome)
        } else {
            AttemptRecord {
                outcome: AttemptOutcome::UnlockFailed,
                ..record.with_unlock(outcome)
            }
        }
    }
}

fn rejected(source: TriggerSource, result: &MatchResult) -> AttemptRecord {
    if result.no_face() {
        return AttemptRecord::new(source, AttemptOutcome::NoFace);
    }

    let outcome = if result.low_confidence {
        AttemptOutcome::LowConfidence
    } else {
        AttemptOutcome::NoMatch
    };
    AttemptRecord::new(source, outcome).with_identity(result.identity.clone(), result.confidence)
}

fn log_record(record: &AttemptRecord) {
    match record.outcome {
        AttemptOutcome::Success => tracing::info!("Access granted: {}", record.summary()),
        AttemptOutcome::UnlockFailed => tracing::warn!("{}", record.summary()),
        _ => tracing::info!("{}", record.summary()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::FaceUnlockError;
    use crate::core::matcher::{Embedding, GalleryEntry};
    use async_trait::async_trait;

    struct FixedCapture(Option<Vec<u8>>);

    #[async_trait]
    impl Capture for FixedCapture {
        async fn capture(&self) -> Result<Vec<u8>> {
            self.0
                .clone()
                .ok_or_else(|| FaceUnlockError::Camera("camera unplugged".into()))
        }
    }

    struct FixedEncoder(Option<Vec<Embedding>>);

    impl FaceEncoder for FixedEncoder {
        fn encode(&self, _image: &[u8]) -> Result<Vec<Embedding>> {
            self.0
                .clone()
                .ok_or_else(|| FaceUnlockError::Model("bad frame".into()))
        }
    }

    fn orchestrator(capture: Option<Vec<u8>>, faces: Option<Vec<Embedding>>) -> Orchestrator {
        let gallery = Gallery::new(vec![GalleryEntry::new("alice", vec![1.0, 0.0])], 0.4);
        Orchestrator::new(
            Arc::new(FixedCapture(capture)),
            Arc::new(FixedEncoder(faces)),
            Arc::new(gallery),
            None,
            AttemptJournal::disabled(),
            MatchSettings {
                tolerance: 0.4,
                confidence_threshold: 0.6,
            },
        )
    }

    async fn outcome_of(orchestrator: &Orchestrator) -> AttemptOutcome {
        match orchestrator.attempt(TriggerSource::Cli).await {
            AttemptResult::Completed(record) => record.outcome,
            AttemptResult::Busy => panic!("gate should be free"),
        }
    }

    #[tokio::test]
    async fn recognized_face_without_unlock_is_success() {
        let orch = orchestrator(Some(vec![1]), Some(vec![vec![1.0, 0.0]]));
        let result = orch.attempt(TriggerSource::Button).await;

        let record = result.record().unwrap();
        assert_eq!(record.outcome, AttemptOutcome::Success);
        assert_eq!(record.identity.as_deref(), Some("alice"));
        assert_eq!(record.unlock, None);
        assert!(orch.state().cooldown.last_success().is_some());
        assert_eq!(orch.stats().successful, 1);
    }

    #[tokio::test]
    async fn capture_error_is_capture_failed() {
        let orch = orchestrator(None, Some(vec![]));
        assert_eq!(outcome_of(&orch).await, AttemptOutcome::CaptureFailed);
    }

    #[tokio::test]
    async fn encoder_error_is_capture_failed() {
        let orch = orchestrator(Some(vec![1]), None);
        assert_eq!(outcome_of(&orch).await, AttemptOutcome::CaptureFailed);
    }

    #[tokio::test]
    async fn empty_frame_is_no_face() {
        let orch = orchestrator(Some(vec![1]), Some(vec![]));
        assert_eq!(outcome_of(&orch).await, AttemptOutcome::NoFace);
    }

    #[tokio::test]
    async fn inside_tolerance_but_unsure_is_low_confidence() {
        // distance 0.39 passes tolerance 0.4 but 0.61 confidence needs a
        // tighter threshold than configured here
        let mut orch = orchestrator(Some(vec![1]), Some(vec![vec![1.0, 0.39]]));
        orch.settings.confidence_threshold = 0.7;
        assert_eq!(outcome_of(&orch).await, AttemptOutcome::LowConfidence);
    }

    #[tokio::test]
    async fn stranger_is_no_match() {
        let orch = orchestrator(Some(vec![1]), Some(vec![vec![-1.0, 0.0]]));
        assert_eq!(outcome_of(&orch).await, AttemptOutcome::NoMatch);
        assert!(orch.state().cooldown.last_success().is_none());
    }

    #[tokio::test]
    async fn held_gate_reports_busy_and_records_nothing() {
        let orch = orchestrator(Some(vec![1]), Some(vec![vec![1.0, 0.0]]));
        let permit = orch.state().gate.try_acquire().unwrap();

        assert_eq!(orch.attempt(TriggerSource::Timer).await, AttemptResult::Busy);
        assert_eq!(orch.stats().total_attempts, 0);

        drop(permit);
        assert!(orch.attempt(TriggerSource::Timer).await.record().is_some());
    }

    #[tokio::test]
    async fn gate_is_released_after_every_outcome() {
        let orch = orchestrator(None, None);
        for _ in 0..3 {
            outcome_of(&orch).await;
            assert!(!orch.is_processing());
        }
        let stats = orch.stats();
        assert_eq!(stats.total_attempts, 3);
        assert_eq!(stats.failed, 3);
    }

    #[tokio::test]
    async fn spawned_attempts_are_awaited_before_stats_are_read() {
        let orch = Arc::new(orchestrator(Some(vec![1]), Some(vec![vec![1.0, 0.0]])));
        let permit = orch.state().gate.try_acquire().unwrap();

        let handle = orch.spawn_attempt(TriggerSource::Http);
        assert_eq!(handle.await.unwrap(), AttemptResult::Busy);
        assert_eq!(orch.attempts_in_flight(), 0);
        drop(permit);

        orch.spawn_attempt(TriggerSource::Button);
        assert_eq!(orch.attempts_in_flight(), 1);
        orch.wait_for_attempts().await;

        assert_eq!(orch.attempts_in_flight(), 0);
        assert_eq!(orch.stats().total_attempts, 1);
    }

    #[tokio::test]
    async fn waiting_with_nothing_in_flight_returns_at_once() {
        let orch = orchestrator(None, None);
        tokio::time::timeout(Duration::from_secs(1), orch.wait_for_attempts())
            .await
            .unwrap();
    }
}
