//! HTTP trigger surface.

use super::{AttemptTrigger, TriggerOutcome};
use crate::common::config::WebConfig;
use crate::common::Result;
use crate::core::{AttemptStats, Orchestrator, TriggerSource};
use async_trait::async_trait;
use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

/// Runs attempts on a tracked task and stops waiting after `attempt_timeout`.
pub struct HttpTrigger {
    orchestrator: Arc<Orchestrator>,
    attempt_timeout: Duration,
}

impl HttpTrigger {
    pub fn new(orchestrator: Arc<Orchestrator>, attempt_timeout: Duration) -> Self {
        Self {
            orchestrator,
            attempt_timeout,
        }
    }
}

#[async_trait]
impl AttemptTrigger for HttpTrigger {
    fn source(&self) -> TriggerSource {
        TriggerSource::Http
    }

    async fn invoke(&self) -> TriggerOutcome {
        let attempt = self.orchestrator.spawn_attempt(self.source());

        match tokio::time::timeout(self.attempt_timeout, attempt).await {
            Ok(Ok(result)) => result.into(),
            Ok(Err(e)) => {
                tracing::error!("Attempt task failed: {}", e);
                TriggerOutcome::Aborted { reason: e.to_string() }
            }
            Err(_) => {
                tracing::warn!("No result within {:?}; the attempt continues in the background", self.attempt_timeout);
                TriggerOutcome::TimedOut
            }
        }
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub trigger: Arc<HttpTrigger>,
    pub orchestrator: Arc<Orchestrator>,
    pub version: String,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, config: &WebConfig) -> Self {
        Self {
            trigger: Arc::new(HttpTrigger::new(Arc::clone(&orchestrator), config.attempt_timeout())),
            orchestrator,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TriggerResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub system_initialized: bool,
    pub is_processing: bool,
    pub stats: AttemptStats,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub timestamp: f64,
    pub system_initialized: bool,
    pub is_processing: bool,
    pub version: String,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/trigger_unlock", post(trigger_unlock))
        .route("/status", get(status))
        .route("/test_mac", get(test_unlock_service))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves the router until `shutdown` flips to true.
pub async fn serve(addr: SocketAddr, state: AppState, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Web trigger listening on http://{}", listener.local_addr()?);

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async move {
            while shutdown.changed().await.is_ok() {
                if *shutdown.borrow() {
                    break;
                }
            }
        })
        .await?;

    tracing::info!("Web trigger stopped");
    Ok(())
}

async fn trigger_unlock(State(state): State<AppState>) -> Json<TriggerResponse> {
    let outcome = state.trigger.invoke().await;
    Json(TriggerResponse {
        success: outcome.success(),
        message: outcome.message(),
    })
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        system_initialized: true,
        is_processing: state.orchestrator.is_processing(),
        stats: state.orchestrator.stats(),
    })
}

async fn test_unlock_service(State(state): State<AppState>) -> Json<TriggerResponse> {
    let (success, message) = match state.orchestrator.probe_unlock().await {
        Some(true) => (true, "Unlock service is reachable"),
        Some(false) => (false, "Unlock service is not responding"),
        None => (false, "Unlock is disabled in the configuration"),
    };
    Json(TriggerResponse {
        success,
        message: message.to_string(),
    })
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let now = chrono::Utc::now();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "face-unlock-web".to_string(),
        timestamp: now.timestamp_millis() as f64 / 1000.0,
        system_initialized: true,
        is_processing: state.orchestrator.is_processing(),
        version: state.version.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Capture;
    use crate::core::{Embedding, FaceEncoder, GalleryEntry, MatchSettings};
    use crate::storage::{AttemptJournal, Gallery};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    struct SlowCapture(Duration);

    #[async_trait]
    impl Capture for SlowCapture {
        async fn capture(&self) -> Result<Vec<u8>> {
            tokio::time::sleep(self.0).await;
            Ok(vec![0])
        }
    }

    struct Alice;

    impl FaceEncoder for Alice {
        fn encode(&self, _image: &[u8]) -> Result<Vec<Embedding>> {
            Ok(vec![vec![0.0, 1.0]])
        }
    }

    fn state(capture_delay: Duration, attempt_timeout: Duration) -> AppState {
        let gallery = Gallery::new(vec![GalleryEntry::new("alice", vec![0.0, 1.0])], 0.4);
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::new(SlowCapture(capture_delay)),
            Arc::new(Alice),
            Arc::new(gallery),
            None,
            AttemptJournal::disabled(),
            MatchSettings { tolerance: 0.4, confidence_threshold: 0.6 },
        ));
        let config = WebConfig {
            attempt_timeout_secs: 30,
            ..WebConfig::default()
        };
        let mut state = AppState::new(orchestrator, &config);
        state.trigger = Arc::new(HttpTrigger::new(Arc::clone(&state.orchestrator), attempt_timeout));
        state
    }

    async fn call(app: Router, method: &str, uri: &str) -> serde_json::Value {
        let resp = app
            .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn trigger_reports_recognition() {
        let state = state(Duration::ZERO, Duration::from_secs(5));
        let json = call(create_router(state.clone()), "POST", "/trigger_unlock").await;

        assert_eq!(json["success"], true);
        assert!(json["message"].as_str().unwrap().contains("alice"));
        assert_eq!(state.orchestrator.stats().successful, 1);
    }

    #[tokio::test]
    async fn trigger_while_busy_is_rejected() {
        let state = state(Duration::ZERO, Duration::from_secs(5));
        let _permit = state.orchestrator.state().gate.try_acquire().unwrap();

        let json = call(create_router(state.clone()), "POST", "/trigger_unlock").await;

        assert_eq!(json["success"], false);
        assert!(json["message"].as_str().unwrap().contains("in progress"));
        assert_eq!(state.orchestrator.stats().total_attempts, 0);
    }

    #[tokio::test]
    async fn slow_attempt_times_out_but_still_completes() {
        let state = state(Duration::from_millis(300), Duration::from_millis(20));
        let json = call(create_router(state.clone()), "POST", "/trigger_unlock").await;

        assert_eq!(json["success"], false);
        assert_eq!(json["message"], "Attempt timed out");
        assert!(state.orchestrator.is_processing());

        assert_eq!(state.orchestrator.attempts_in_flight(), 1);
        state.orchestrator.wait_for_attempts().await;
        assert!(!state.orchestrator.is_processing());
        assert_eq!(state.orchestrator.stats().total_attempts, 1);
    }

    #[tokio::test]
    async fn status_and_health_describe_the_system() {
        let state = state(Duration::ZERO, Duration::from_secs(5));

        let status = call(create_router(state.clone()), "GET", "/status").await;
        assert_eq!(status["system_initialized"], true);
        assert_eq!(status["is_processing"], false);
        assert_eq!(status["stats"]["total_attempts"], 0);

        let health = call(create_router(state), "GET", "/health").await;
        assert_eq!(health["status"], "healthy");
        assert_eq!(health["service"], "face-unlock-web");
        assert!(health["timestamp"].as_f64().unwrap() > 0.0);
    }

    #[tokio::test]
    async fn service_check_without_unlock_client_fails() {
        let state = state(Duration::ZERO, Duration::from_secs(5));
        let json = call(create_router(state), "GET", "/test_mac").await;

        assert_eq!(json["success"], false);
    }
}
