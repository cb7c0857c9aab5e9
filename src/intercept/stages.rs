use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;
use uuid::Uuid;

use crate::message::Message;
use crate::plugin::Intercepts;
use crate::provenance::StageId;
use crate::utils::Result;

/// Appends `<messageCount>k</messageCount>` to the detail text, where `k` is
/// the number of messages this stage instance has intercepted, starting at 1.
///
/// The counter belongs to the instance and is atomic, so the stage may be
/// shared between a scheduled sender and a relay worker.
#[derive(Debug)]
pub struct CounterStage {
    id: StageId,
    count: AtomicU64,
    output_groups: Option<BTreeSet<String>>,
}

impl CounterStage {
    pub fn new(id: StageId) -> Self {
        Self {
            id,
            count: AtomicU64::new(0),
            output_groups: None,
        }
    }

    /// Also rescope every intercepted message to `groups`.
    pub fn with_output_groups(mut self, groups: Option<BTreeSet<String>>) -> Self {
        self.output_groups = groups;
        self
    }

    /// Number of messages intercepted so far.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }
}

impl Intercepts for CounterStage {
    fn stage_id(&self) -> &StageId {
        &self.id
    }

    fn intercept(&self, message: &Message) -> Result<Message> {
        let count = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(stage = %self.id, count, "intercepted message");

        let mut builder = message.to_builder();
        if let Some(groups) = &self.output_groups {
            builder = builder.groups(groups.iter().cloned());
        }

        Ok(builder
            .append_detail(&format!("<messageCount>{count}</messageCount>"))
            .add_provenance(self.id.as_str())
            .build())
    }
}

/// Appends `<myUuid>{random v4}</myUuid>` to the detail text.
#[derive(Debug)]
pub struct UuidInjectorStage {
    id: StageId,
}

impl UuidInjectorStage {
    pub fn new(id: StageId) -> Self {
        Self { id }
    }
}

impl Intercepts for UuidInjectorStage {
    fn stage_id(&self) -> &StageId {
        &self.id
    }

    fn intercept(&self, message: &Message) -> Result<Message> {
        Ok(message
            .to_builder()
            .append_detail(&format!("<myUuid>{}</myUuid>", Uuid::new_v4()))
            .add_provenance(self.id.as_str())
            .build())
    }
}
