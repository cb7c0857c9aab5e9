//! Broker wire protocol: JSON text frames tagged by `type`.

use serde::{Deserialize, Serialize};

use crate::broker::Publication;

/// Frames a client sends to the broker.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "subscribe")]
    Subscribe { topic: String },

    #[serde(rename = "unsubscribe")]
    Unsubscribe { topic: String },

    #[serde(rename = "publish")]
    Publish {
        topic: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
        payload: String,
    },
}

/// Frames the broker sends to a client.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "message")]
    Message {
        topic: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
        payload: String,
        timestamp: i64,
    },

    #[serde(rename = "error")]
    Error { message: String },
}

impl From<Publication> for ServerMessage {
    fn from(p: Publication) -> Self {
        ServerMessage::Message {
            topic: p.topic,
            key: p.key,
            payload: p.payload,
            timestamp: p.timestamp,
        }
    }
}
