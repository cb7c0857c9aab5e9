//! The `message` module defines the envelope that flows through the relay.
//!
//! A [`Message`] is immutable once built: every transform goes through
//! [`Message::to_builder`] and produces a new value, so a message that has
//! been handed to a queue or a sink can never change underneath its reader.

mod convert;
mod event;

pub use convert::{JsonConverter, MessageConverter};
pub use event::{CotEvent, Detail, Point};

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Explicit recipients of a message.
///
/// Both lists empty means broadcast to every authorized subscriber in the
/// message's groups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destinations {
    #[serde(default)]
    pub client_uids: Vec<String>,
    #[serde(default)]
    pub callsigns: Vec<String>,
}

impl Destinations {
    pub fn is_broadcast(&self) -> bool {
        self.client_uids.is_empty() && self.callsigns.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    payload: CotEvent,
    #[serde(default)]
    destinations: Destinations,
    #[serde(default)]
    groups: BTreeSet<String>,
    #[serde(default)]
    provenance: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source: Option<String>,
}

impl Message {
    pub fn new(payload: CotEvent) -> Self {
        Self {
            payload,
            destinations: Destinations::default(),
            groups: BTreeSet::new(),
            provenance: Vec::new(),
            source: None,
        }
    }

    pub fn payload(&self) -> &CotEvent {
        &self.payload
    }

    pub fn destinations(&self) -> &Destinations {
        &self.destinations
    }

    pub fn groups(&self) -> &BTreeSet<String> {
        &self.groups
    }

    /// Stage identifiers that already processed this message, oldest first.
    pub fn provenance(&self) -> &[String] {
        &self.provenance
    }

    /// Identifier of the component that created the message at ingress.
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Shortcut for the free-form detail text of the payload.
    pub fn xml_detail(&self) -> &str {
        &self.payload.detail.xml_detail
    }

    /// True if the message is scoped to at least one of `groups`.
    pub fn in_any_group(&self, groups: &BTreeSet<String>) -> bool {
        self.groups.iter().any(|g| groups.contains(g))
    }

    /// Start a new message derived from this one.
    pub fn to_builder(&self) -> MessageBuilder {
        MessageBuilder {
            inner: self.clone(),
        }
    }
}

/// Builder producing a new [`Message`] from an existing one.
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    inner: Message,
}

impl MessageBuilder {
    pub fn new(payload: CotEvent) -> Self {
        Self {
            inner: Message::new(payload),
        }
    }

    pub fn append_detail(mut self, text: &str) -> Self {
        self.inner.payload.detail.xml_detail.push_str(text);
        self
    }

    pub fn groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner.groups = groups.into_iter().map(Into::into).collect();
        self
    }

    pub fn add_group(mut self, group: impl Into<String>) -> Self {
        self.inner.groups.insert(group.into());
        self
    }

    pub fn add_dest_callsigns<I, S>(mut self, callsigns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner
            .destinations
            .callsigns
            .extend(callsigns.into_iter().map(Into::into));
        self
    }

    pub fn add_dest_client_uids<I, S>(mut self, uids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner
            .destinations
            .client_uids
            .extend(uids.into_iter().map(Into::into));
        self
    }

    pub fn add_provenance(mut self, stage: impl Into<String>) -> Self {
        self.inner.provenance.push(stage.into());
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.inner.source = Some(source.into());
        self
    }

    pub fn build(self) -> Message {
        self.inner
    }
}
