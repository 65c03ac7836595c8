use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Remembers the last successful unlock so automatic attempts can back off.
///
/// Only the continuous-monitoring trigger consults this. Button presses and
/// HTTP requests are explicit user intent and bypass it.
#[derive(Debug, Default)]
pub struct CooldownPolicy {
    last_success: Mutex<Option<Instant>>,
}

impl CooldownPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn should_attempt(&self, now: Instant, cooldown: Duration) -> bool {
        self.remaining(now, cooldown).is_none()
    }

    /// Time left before the next automatic attempt is allowed.
    pub fn remaining(&self, now: Instant, cooldown: Duration) -> Option<Duration> {
        let last = (*self.lock())?;
        let elapsed = now.saturating_duration_since(last);
        (elapsed < cooldown).then(|| cooldown - elapsed)
    }

    /// Never moves the recorded instant backwards.
    pub fn record_success(&self, now: Instant) {
        let mut last = self.lock();
        if last.map_or(true, |previous| now > previous) {
            *last = Some(now);
        }
    }

    pub fn last_success(&self) -> Option<Instant> {
        *self.lock()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Instant>> {
        // The guarded value is a plain Option, a poisoned lock still holds a valid one.
        self.last_success.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
