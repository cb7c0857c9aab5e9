//! Provenance guard.
//!
//! Every stage that transforms a message appends its [`StageId`] to the
//! message's provenance. A stage that finds its own id already present is
//! looking at its own output coming back around and must not process it again.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::message::Message;
use crate::utils::{RelayError, Result};

/// Name of a processing stage. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StageId(String);

impl StageId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(RelayError::InvalidArgument(
                "stage id must not be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for StageId {
    type Error = RelayError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<StageId> for String {
    fn from(id: StageId) -> Self {
        id.0
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// True iff `stage` already appears in the message's provenance.
pub fn has_processed(message: &Message, stage: &StageId) -> bool {
    message.provenance().iter().any(|p| p == stage.as_str())
}

/// Returns a copy of `message` with `stage` appended to its provenance.
pub fn stamp(message: &Message, stage: &StageId) -> Message {
    message.to_builder().add_provenance(stage.as_str()).build()
}
