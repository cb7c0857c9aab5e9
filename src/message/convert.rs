//! Text <-> `Message` conversion at the broker boundary.
//!
//! The bridge treats a converter as an opaque, failure-returning function:
//! a failed conversion drops that single record and nothing else.

use std::collections::BTreeSet;

use super::Message;
use crate::utils::{RelayError, Result};

pub trait MessageConverter: Send + Sync {
    /// Decode raw inbound text. Non-empty `groups` replace whatever groups the
    /// text carried; `source_id` names the ingress component.
    fn text_to_message(
        &self,
        text: &str,
        groups: &BTreeSet<String>,
        source_id: &str,
    ) -> Result<Message>;

    fn message_to_text(&self, message: &Message) -> Result<String>;
}

/// Converter for the JSON text form used on the embedded broker.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonConverter;

impl MessageConverter for JsonConverter {
    fn text_to_message(
        &self,
        text: &str,
        groups: &BTreeSet<String>,
        source_id: &str,
    ) -> Result<Message> {
        let decoded: Message = serde_json::from_str(text)
            .map_err(|e| RelayError::Conversion(format!("malformed message text: {e}")))?;

        let mut builder = decoded.to_builder().source(source_id);
        if !groups.is_empty() {
            builder = builder.groups(groups.iter().cloned());
        }
        Ok(builder.build())
    }

    fn message_to_text(&self, message: &Message) -> Result<String> {
        serde_json::to_string(message)
            .map_err(|e| RelayError::Conversion(format!("cannot encode message: {e}")))
    }
}
