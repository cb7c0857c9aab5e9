//! Interceptor chain.
//!
//! Stages run strictly in the order they were added; each one sees the
//! output of the stage before it. Before a stage runs, the chain checks the
//! message's provenance for that stage's id and stops with
//! [`ChainOutcome::LoopDetected`] if it is already there. A stage error is
//! not swallowed: it ends this pass through the chain and is returned to the
//! caller, which decides whether to log and drop.

mod stages;

pub use stages::{CounterStage, UuidInjectorStage};

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::message::Message;
use crate::plugin::Intercepts;
use crate::provenance::{self, StageId};
use crate::utils::Result;

#[derive(Debug, Clone, PartialEq)]
pub enum ChainOutcome {
    /// Every stage ran; this is the message to deliver.
    Delivered(Message),
    /// `stage` had already processed the message. Nothing after it ran.
    LoopDetected { stage: StageId, message: Message },
}

#[derive(Clone, Default)]
pub struct InterceptorChain {
    stages: Vec<Arc<dyn Intercepts>>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stage(mut self, stage: Arc<dyn Intercepts>) -> Self {
        self.push(stage);
        self
    }

    pub fn push(&mut self, stage: Arc<dyn Intercepts>) {
        self.stages.push(stage);
    }

    /// Append every stage of `other` after this chain's stages.
    pub fn then(mut self, other: InterceptorChain) -> Self {
        self.stages.extend(other.stages);
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_ids(&self) -> Vec<StageId> {
        self.stages.iter().map(|s| s.stage_id().clone()).collect()
    }

    /// Run `message` through every stage in order.
    pub fn apply(&self, message: Message) -> Result<ChainOutcome> {
        let mut current = message;
        for stage in &self.stages {
            let id = stage.stage_id();
            if provenance::has_processed(&current, id) {
                debug!(stage = %id, "message already processed by stage, stopping chain");
                return Ok(ChainOutcome::LoopDetected {
                    stage: id.clone(),
                    message: current,
                });
            }

            let transformed = stage.intercept(&current)?;
            current = if provenance::has_processed(&transformed, id) {
                transformed
            } else {
                provenance::stamp(&transformed, id)
            };
        }
        Ok(ChainOutcome::Delivered(current))
    }
}

impl fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("stages", &self.stage_ids())
            .finish()
    }
}
