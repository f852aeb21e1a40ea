use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::Credentials;

/// Ingestion work item: one user's vendor credentials as of enqueue time.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestMessage {
    pub user_id: String,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for IngestMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestMessage")
            .field("user_id", &self.user_id)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

impl From<Credentials> for IngestMessage {
    fn from(c: Credentials) -> Self {
        Self {
            user_id: c.user_id,
            access_token: c.access_token,
            refresh_token: c.refresh_token,
            expires_at: c.expires_at,
        }
    }
}

impl From<IngestMessage> for Credentials {
    fn from(m: IngestMessage) -> Self {
        Self {
            user_id: m.user_id,
            access_token: m.access_token,
            refresh_token: m.refresh_token,
            expires_at: m.expires_at,
        }
    }
}

/// Aggregation work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessMessage {
    pub user_id: String,
}

/// Notification work item pointing at a stored report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyMessage {
    pub user_id: String,
    pub report_key: String,
}

/// Decode a queue message body, mapping failures to [`Error::InvalidMessage`].
pub fn decode<T: DeserializeOwned>(body: &str) -> Result<T> {
    serde_json::from_str(body).map_err(|e| Error::InvalidMessage(e.to_string()))
}

pub fn encode<T: Serialize>(message: &T) -> Result<String> {
    Ok(serde_json::to_string(message)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_ingest_message() {
        let body = r#"{"user_id":"u1","access_token":"a","refresh_token":"r","expires_at":"2025-01-14T12:00:00+00:00"}"#;
        let msg: IngestMessage = decode(body).unwrap();
        assert_eq!(msg.user_id, "u1");
        assert_eq!(msg.expires_at.to_rfc3339(), "2025-01-14T12:00:00+00:00");
    }

    #[test]
    fn test_decode_rejects_missing_fields() {
        let err = decode::<NotifyMessage>(r#"{"user_id":"u1"}"#).unwrap_err();
        assert!(matches!(err, Error::InvalidMessage(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_debug_hides_tokens() {
        let msg: IngestMessage = decode(
            r#"{"user_id":"u1","access_token":"tok-a","refresh_token":"tok-r","expires_at":"2025-01-14T12:00:00Z"}"#,
        )
        .unwrap();
        let debug = format!("{msg:?}");
        assert!(!debug.contains("tok-a"));
        assert!(!debug.contains("tok-r"));
    }
}
