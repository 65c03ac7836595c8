//! HTTP client for the remote unlock agent.

use crate::common::config::UnlockConfig;
use crate::common::Result;
use crate::service::protocol::{StatusReply, UnlockReply, UnlockRequest, STATUS_PATH, UNLOCK_PATH};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Result of a single unlock request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum UnlockOutcome {
    /// 2xx from the agent.
    Granted { status: Option<String> },
    /// 401: bad key or user. Never retried.
    Denied,
    /// The connection could not be established.
    Unreachable,
    /// The agent accepted the connection but did not answer in time. The
    /// unlock is fire-and-forget on the remote side and may already be under
    /// way, so this counts as a success for cooldown purposes and is logged
    /// separately for auditing.
    TimedOutButLikelySucceeded,
    /// Any other HTTP status.
    Failed { status: u16 },
}

impl UnlockOutcome {
    pub fn counts_as_success(&self) -> bool {
        matches!(
            self,
            UnlockOutcome::Granted { .. } | UnlockOutcome::TimedOutButLikelySucceeded
        )
    }
}

impl fmt::Display for UnlockOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnlockOutcome::Granted { status: Some(status) } => write!(f, "granted ({})", status),
            UnlockOutcome::Granted { status: None } => f.write_str("granted"),
            UnlockOutcome::Denied => f.write_str("denied"),
            UnlockOutcome::Unreachable => f.write_str("unreachable"),
            UnlockOutcome::TimedOutButLikelySucceeded => f.write_str("timed out (may have succeeded)"),
            UnlockOutcome::Failed { status } => write!(f, "failed (HTTP {})", status),
        }
    }
}

/// Talks to the unlock agent. Issues exactly one request per call.
#[derive(Debug, Clone)]
pub struct UnlockClient {
    client: Client,
    endpoint: String,
    key: String,
    timeout: Duration,
    probe_timeout: Duration,
}

impl UnlockClient {
    pub fn new(endpoint: &str, key: &str, timeout: Duration, probe_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            key: key.to_string(),
            timeout,
            probe_timeout,
        })
    }

    pub fn from_config(config: &UnlockConfig) -> Result<Self> {
        Self::new(&config.endpoint(), &config.key, config.timeout(), config.probe_timeout())
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn unlock(&self, user: &str) -> UnlockOutcome {
        let url = format!("{}{}", self.endpoint, UNLOCK_PATH);
        let body = UnlockRequest {
            user: user.to_string(),
            key: self.key.clone(),
        };

        tracing::info!("Requesting unlock for {} at {}", user, url);
        let response = match self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return classify_transport_error(&e),
        };

        let status = response.status();
        if status.is_success() {
            let reply = match response.json::<UnlockReply>().await {
                Ok(reply) => reply.status,
                Err(e) if e.is_timeout() => {
                    tracing::warn!("Unlock reply body timed out after headers: {}", e);
                    None
                }
                Err(e) => {
                    tracing::warn!("Unlock reply was not the expected JSON: {}", e);
                    None
                }
            };
            tracing::info!("Unlock granted (status: {})", reply.as_deref().unwrap_or("-"));
            UnlockOutcome::Granted { status: reply }
        } else if status == StatusCode::UNAUTHORIZED {
            tracing::warn!("Unlock denied by agent: check the shared key and user");
            UnlockOutcome::Denied
        } else {
            tracing::warn!("Unlock failed: HTTP {}", status.as_u16());
            UnlockOutcome::Failed { status: status.as_u16() }
        }
    }

    /// Liveness check of the agent. Any failure is reported as `false`.
    pub async fn probe(&self) -> bool {
        let url = format!("{}{}", self.endpoint, STATUS_PATH);
        let response = match self.client.get(&url).timeout(self.probe_timeout).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Unlock service did not respond: {}", e);
                return false;
            }
        };

        if response.status() != StatusCode::OK {
            tracing::warn!("Unlock service unhealthy: HTTP {}", response.status().as_u16());
            return false;
        }

        match response.json::<StatusReply>().await {
            Ok(reply) => {
                tracing::info!("Unlock service ok: {}", reply.status);
                true
            }
            Err(e) => {
                tracing::warn!("Unlock service status reply malformed: {}", e);
                false
            }
        }
    }
}

fn classify_transport_error(error: &reqwest::Error) -> UnlockOutcome {
    // A request that never connected cannot have started anything remotely.
    if error.is_connect() {
        tracing::warn!("Cannot reach unlock service: {}", error);
        UnlockOutcome::Unreachable
    } else if error.is_timeout() {
        tracing::warn!("Unlock request timed out, the unlock may still be in progress");
        UnlockOutcome::TimedOutButLikelySucceeded
    } else {
        tracing::warn!("Unlock request failed: {}", error);
        UnlockOutcome::Unreachable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, timeout: Duration) -> UnlockClient {
        UnlockClient::new(&server.uri(), "face_unlock_2024", timeout, Duration::from_millis(500)).unwrap()
    }

    #[tokio::test]
    async fn ok_reply_is_granted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/unlock"))
            .and(body_json(serde_json::json!({"user": "alice", "key": "face_unlock_2024"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "unlocked"})))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = client_for(&server, Duration::from_secs(2)).unlock("alice").await;
        assert_eq!(outcome, UnlockOutcome::Granted { status: Some("unlocked".into()) });
        assert!(outcome.counts_as_success());
    }

    #[tokio::test]
    async fn unauthorized_is_denied_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/unlock"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = client_for(&server, Duration::from_secs(2)).unlock("alice").await;
        assert_eq!(outcome, UnlockOutcome::Denied);
        assert!(!outcome.counts_as_success());
    }

    #[tokio::test]
    async fn server_error_is_failed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/unlock"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let outcome = client_for(&server, Duration::from_secs(2)).unlock("alice").await;
        assert_eq!(outcome, UnlockOutcome::Failed { status: 500 });
        assert!(!outcome.counts_as_success());
    }

    #[tokio::test]
    async fn slow_agent_is_optimistic_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/unlock"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let outcome = client_for(&server, Duration::from_millis(200)).unlock("alice").await;
        assert_eq!(outcome, UnlockOutcome::TimedOutButLikelySucceeded);
        assert!(outcome.counts_as_success());
    }

    #[tokio::test]
    async fn closed_port_is_unreachable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = UnlockClient::new(
            &format!("http://{}", addr),
            "face_unlock_2024",
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(client.unlock("alice").await, UnlockOutcome::Unreachable);
        assert!(!client.probe().await);
    }

    #[tokio::test]
    async fn probe_requires_status_field() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "running"})))
            .mount(&server)
            .await;
        assert!(client_for(&server, Duration::from_secs(1)).probe().await);

        let bare = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&bare)
            .await;
        assert!(!client_for(&bare, Duration::from_secs(1)).probe().await);
    }

    #[tokio::test]
    async fn probe_swallows_http_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        assert!(!client_for(&server, Duration::from_secs(1)).probe().await);
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let client = UnlockClient::new(
            "http://mac.local:5001/",
            "k",
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(client.endpoint(), "http://mac.local:5001");
    }
}
