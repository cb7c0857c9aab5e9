use serde::{Deserialize, Serialize};

/// A record accepted by the broker for fan-out.
///
/// `timestamp` is milliseconds since the Unix epoch, stamped by the broker
/// on receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Publication {
    pub topic: String,
    pub key: Option<String>,
    pub payload: String,
    pub timestamp: i64,
}

impl Publication {
    pub fn now(topic: impl Into<String>, key: Option<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            key,
            payload: payload.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}
