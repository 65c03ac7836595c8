use super::{AttemptTrigger, TriggerOutcome};
use crate::core::{Orchestrator, TriggerSource};
use async_trait::async_trait;
use std::io::BufRead;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEvent {
    Press,
    ShowStats,
    CheckService,
    Quit,
}

/// Maps a line typed in manual mode to an event. Enter alone is a press.
pub fn parse_key(line: &str) -> Option<ButtonEvent> {
    match line.trim().to_ascii_lowercase().as_str() {
        "" => Some(ButtonEvent::Press),
        "s" => Some(ButtonEvent::ShowStats),
        "c" => Some(ButtonEvent::CheckService),
        "q" => Some(ButtonEvent::Quit),
        _ => None,
    }
}

/// Feeds stdin lines into `events` until EOF, `q`, or the receiver goes away.
///
/// Runs on a plain thread: a blocking stdin read cannot be cancelled and
/// must not hold up runtime shutdown.
pub fn spawn_stdin_reader(events: mpsc::Sender<ButtonEvent>) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new().name("stdin-button".into()).spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    tracing::warn!("Failed to read stdin: {}", e);
                    break;
                }
            };

            let Some(event) = parse_key(&line) else {
                println!("Unknown command '{}'. Enter = recognize, s = stats, c = check service, q = quit", line.trim());
                continue;
            };
            if events.blocking_send(event).is_err() || event == ButtonEvent::Quit {
                break;
            }
        }
    })
}

/// Physical or manual button. Presses bypass the cooldown; rapid repeat
/// edges inside the debounce window are dropped.
pub struct ButtonTrigger {
    orchestrator: Arc<Orchestrator>,
    debounce: Duration,
    last_press: Mutex<Option<Instant>>,
}

impl ButtonTrigger {
    pub fn new(orchestrator: Arc<Orchestrator>, debounce: Duration) -> Self {
        Self {
            orchestrator,
            debounce,
            last_press: Mutex::new(None),
        }
    }

    /// Returns false for a bounce of the previous press.
    pub fn accept_press(&self, now: Instant) -> bool {
        let mut last = self.last_press.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match *last {
            Some(previous) if now.saturating_duration_since(previous) < self.debounce => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    /// Handles events until `q` or shutdown. Each press runs on its own
    /// tracked task so presses during an attempt are answered `Busy` instead
    /// of queueing. A closed channel (stdin at EOF) leaves the button idle
    /// while the other sources keep running.
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::Receiver<ButtonEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        tracing::info!("Button ready: Enter = recognize, s = stats, c = check service, q = quit");

        let mut connected = true;
        loop {
            let event = tokio::select! {
                event = events.recv(), if connected => match event {
                    Some(event) => event,
                    None => {
                        tracing::info!("Button input closed; button idle until shutdown");
                        connected = false;
                        continue;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            };

            match event {
                ButtonEvent::Press => {
                    if !self.accept_press(Instant::now()) {
                        tracing::debug!("Ignoring button bounce");
                        continue;
                    }
                    let attempt = self.orchestrator.spawn_attempt(self.source());
                    tokio::spawn(async move {
                        let outcome = match attempt.await {
                            Ok(result) => TriggerOutcome::from(result),
                            Err(e) => TriggerOutcome::Aborted { reason: e.to_string() },
                        };
                        println!("{}", outcome.message());
                    });
                }
                ButtonEvent::ShowStats => println!("{}", self.orchestrator.stats().report()),
                ButtonEvent::CheckService => {
                    let message = match self.orchestrator.probe_unlock().await {
                        Some(true) => "Unlock service is reachable",
                        Some(false) => "Unlock service is not responding",
                        None => "Unlock is disabled in the configuration",
                    };
                    println!("{}", message);
                }
                ButtonEvent::Quit => {
                    tracing::info!("Quit requested");
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl AttemptTrigger for ButtonTrigger {
    fn source(&self) -> TriggerSource {
        TriggerSource::Button
    }

    async fn invoke(&self) -> TriggerOutcome {
        self.orchestrator.attempt(self.source()).await.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Capture;
    use crate::common::{FaceUnlockError, Result};
    use crate::core::{Embedding, FaceEncoder, MatchSettings};
    use crate::storage::{AttemptJournal, Gallery};

    struct NoCamera;

    #[async_trait]
    impl Capture for NoCamera {
        async fn capture(&self) -> Result<Vec<u8>> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Err(FaceUnlockError::Camera("no camera".into()))
        }
    }

    struct NoFaces;

    impl FaceEncoder for NoFaces {
        fn encode(&self, _image: &[u8]) -> Result<Vec<Embedding>> {
            Ok(Vec::new())
        }
    }

    fn trigger(debounce: Duration) -> Arc<ButtonTrigger> {
        let orch = Orchestrator::new(
            Arc::new(NoCamera),
            Arc::new(NoFaces),
            Arc::new(Gallery::new(Vec::new(), 0.4)),
            None,
            AttemptJournal::disabled(),
            MatchSettings { tolerance: 0.4, confidence_threshold: 0.6 },
        );
        Arc::new(ButtonTrigger::new(Arc::new(orch), debounce))
    }

    #[test]
    fn parses_manual_mode_keys() {
        assert_eq!(parse_key(""), Some(ButtonEvent::Press));
        assert_eq!(parse_key("  \n"), Some(ButtonEvent::Press));
        assert_eq!(parse_key("S"), Some(ButtonEvent::ShowStats));
        assert_eq!(parse_key("c"), Some(ButtonEvent::CheckService));
        assert_eq!(parse_key("q"), Some(ButtonEvent::Quit));
        assert_eq!(parse_key("x"), None);
    }

    #[test]
    fn debounce_drops_rapid_presses() {
        let button = trigger(Duration::from_millis(300));
        let start = Instant::now();

        assert!(button.accept_press(start));
        assert!(!button.accept_press(start + Duration::from_millis(100)));
        assert!(button.accept_press(start + Duration::from_millis(300)));
    }

    #[tokio::test]
    async fn press_runs_an_attempt() {
        let button = trigger(Duration::from_millis(300));
        let outcome = button.invoke().await;

        assert!(!outcome.success());
        assert_eq!(outcome.record().map(|r| r.source), Some(TriggerSource::Button));
    }

    #[tokio::test]
    async fn quit_ends_the_loop() {
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (tx, rx) = mpsc::channel(4);
        tx.send(ButtonEvent::Quit).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), trigger(Duration::ZERO).run(rx, shutdown_rx))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn closed_input_leaves_button_idle_until_shutdown() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (tx, rx) = mpsc::channel(4);
        drop(tx);

        let handle = tokio::spawn(trigger(Duration::ZERO).run(rx, shutdown_rx));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!handle.is_finished());

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn press_before_quit_is_still_recorded() {
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let button = trigger(Duration::ZERO);
        let orchestrator = Arc::clone(&button.orchestrator);

        let (tx, rx) = mpsc::channel(4);
        tx.send(ButtonEvent::Press).await.unwrap();
        tx.send(ButtonEvent::Quit).await.unwrap();
        button.run(rx, shutdown_rx).await;

        orchestrator.wait_for_attempts().await;
        let stats = orchestrator.stats();
        assert_eq!(stats.total_attempts, 1);
        assert_eq!(stats.failed, 1);
    }
}
