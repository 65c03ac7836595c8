use serde::{Deserialize, Serialize};

// Wire contract of the remote unlock agent. Field names are fixed.

pub const UNLOCK_PATH: &str = "/unlock";
pub const STATUS_PATH: &str = "/status";

/// Body of `POST {endpoint}/unlock`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UnlockRequest {
    pub user: String,
    pub key: String,
}

/// Successful unlock reply. Only `status` is inspected.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UnlockReply {
    #[serde(default)]
    pub status: Option<String>,
}

/// Reply of `GET {endpoint}/status`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StatusReply {
    pub status: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlock_request_has_exact_field_names() {
        let body = serde_json::to_value(UnlockRequest {
            user: "alice".into(),
            key: "face_unlock_2024".into(),
        })
        .unwrap();

        assert_eq!(body, serde_json::json!({"user": "alice", "key": "face_unlock_2024"}));
    }

    #[test]
    fn status_reply_requires_status_field() {
        assert!(serde_json::from_str::<StatusReply>(r#"{"status": "running"}"#).is_ok());
        assert!(serde_json::from_str::<StatusReply>(r#"{"state": "running"}"#).is_err());
    }
}
