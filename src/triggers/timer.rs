use super::{AttemptTrigger, TriggerOutcome};
use crate::common::config::{RecognitionConfig, MIN_CHECK_INTERVAL_SECS};
use crate::core::{Orchestrator, TriggerSource};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// Continuous monitoring: attempts on a fixed interval, paused while the
/// post-success cooldown runs.
pub struct TimerTrigger {
    orchestrator: Arc<Orchestrator>,
    interval: Duration,
    cooldown: Duration,
}

impl TimerTrigger {
    /// `interval` is clamped to at least [`MIN_CHECK_INTERVAL_SECS`].
    pub fn new(orchestrator: Arc<Orchestrator>, interval: Duration, cooldown: Duration) -> Self {
        Self {
            orchestrator,
            interval: interval.max(Duration::from_secs_f64(MIN_CHECK_INTERVAL_SECS)),
            cooldown,
        }
    }

    pub fn from_config(orchestrator: Arc<Orchestrator>, config: &RecognitionConfig) -> Self {
        Self::new(orchestrator, config.check_interval(), config.cooldown())
    }

    /// Runs until `shutdown` flips to true or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            "Monitoring started: checking every {:?}, {:?} cooldown after success",
            self.interval,
            self.cooldown
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.invoke().await {
                        TriggerOutcome::CoolingDown { remaining } => {
                            tracing::trace!("Cooling down, {}s remaining", remaining.as_secs());
                        }
                        TriggerOutcome::Busy => {
                            tracing::debug!("Skipping tick: attempt already running");
                        }
                        _ => {}
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Monitoring stopped");
    }
}

#[async_trait]
impl AttemptTrigger for TimerTrigger {
    fn source(&self) -> TriggerSource {
        TriggerSource::Timer
    }

    async fn invoke(&self) -> TriggerOutcome {
        let now = Instant::now();
        let cooldown = &self.orchestrator.state().cooldown;
        if !cooldown.should_attempt(now, self.cooldown) {
            let remaining = cooldown.remaining(now, self.cooldown).unwrap_or_default();
            return TriggerOutcome::CoolingDown { remaining };
        }

        self.orchestrator.attempt(self.source()).await.into()
    }
}
