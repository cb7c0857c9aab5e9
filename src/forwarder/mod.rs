//! Group-filtering relay.
//!
//! Inbound messages pass an ingress check on the host's delivery path and
//! are parked in a bounded [`RelayQueue`]. A single worker drains the queue,
//! runs each message through the forwarder's own counter stage plus any
//! extra stages, and hands the result back to the host. Messages still
//! queued at stop are abandoned.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::RelaySettings;
use crate::intercept::{ChainOutcome, CounterStage, InterceptorChain};
use crate::message::Message;
use crate::plugin::{Outbound, Plugin, Receives, Sends};
use crate::provenance::{self, StageId};
use crate::queue::{QueueReceiver, RelayQueue, RelayStats, RelayStatsSnapshot};
use crate::utils::{RelayError, Result};

const STOP_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub struct ForwarderConfig {
    pub input_groups: Option<BTreeSet<String>>,
    pub output_groups: Option<BTreeSet<String>>,
    pub queue_size: usize,
}

impl ForwarderConfig {
    pub fn from_settings(settings: &RelaySettings) -> Result<Self> {
        if settings.queue_size == 0 {
            return Err(RelayError::Config(
                "relay.queue_size must be a positive integer".to_string(),
            ));
        }
        Ok(Self {
            input_groups: settings.input_groups.clone(),
            output_groups: settings.output_groups.clone(),
            queue_size: settings.queue_size,
        })
    }

    /// `true` if the message may enter the queue.
    fn admits(&self, message: &Message) -> bool {
        match &self.input_groups {
            Some(allowed) => message.in_any_group(allowed),
            None => true,
        }
    }
}

pub struct Forwarder {
    name: String,
    stage_id: StageId,
    config: ForwarderConfig,
    queue: RelayQueue,
    receiver: Mutex<Option<QueueReceiver>>,
    counter: Arc<CounterStage>,
    chain: InterceptorChain,
    outbound: Arc<dyn Outbound>,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<RelayStats>,
}

impl Forwarder {
    /// Builds the queue immediately, so an invalid size fails here rather
    /// than at `start`.
    pub fn new(
        stage_id: StageId,
        config: ForwarderConfig,
        outbound: Arc<dyn Outbound>,
    ) -> Result<Self> {
        let (queue, receiver) = RelayQueue::new(config.queue_size)?;
        let counter = Arc::new(
            CounterStage::new(stage_id.clone()).with_output_groups(config.output_groups.clone()),
        );
        let chain = InterceptorChain::new().with_stage(counter.clone());

        Ok(Self {
            name: format!("forwarder:{stage_id}"),
            stage_id,
            config,
            queue,
            receiver: Mutex::new(Some(receiver)),
            counter,
            chain,
            outbound,
            shutdown: CancellationToken::new(),
            worker: Mutex::new(None),
            stats: Arc::new(RelayStats::default()),
        })
    }

    /// Append extra stages after the forwarder's own counter stage.
    pub fn with_stages(mut self, extra: InterceptorChain) -> Self {
        debug!(forwarder = %self.stage_id, stages = ?extra.stage_ids(), "adding stages");
        self.chain = self.chain.then(extra);
        self
    }

    pub fn stage_id(&self) -> &StageId {
        &self.stage_id
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn forwarded_count(&self) -> u64 {
        self.counter.count()
    }

    pub fn stats(&self) -> RelayStatsSnapshot {
        self.stats.snapshot()
    }

    /// Ingress path. Returns whether the message was queued.
    pub fn offer(&self, message: Message) -> bool {
        if provenance::has_processed(&message, &self.stage_id) {
            self.stats.record_loop_drop();
            debug!(forwarder = %self.stage_id, "dropping echo of own output");
            return false;
        }
        if !self.config.admits(&message) {
            self.stats.record_group_filter_drop();
            debug!(
                forwarder = %self.stage_id,
                groups = ?message.groups(),
                "message outside input groups"
            );
            return false;
        }
        if !self.queue.offer(message) {
            self.stats.record_backpressure_drop();
            warn!(
                forwarder = %self.stage_id,
                capacity = self.queue.capacity(),
                "relay queue full, dropping message"
            );
            return false;
        }
        self.stats.record_enqueued();
        debug!(forwarder = %self.stage_id, queue_len = self.queue.len(), "message queued");
        true
    }

    async fn run_worker(
        mut receiver: QueueReceiver,
        chain: InterceptorChain,
        outbound: Arc<dyn Outbound>,
        stats: Arc<RelayStats>,
        shutdown: CancellationToken,
        stage_id: StageId,
    ) {
        let sink = OutboundSink(outbound);
        while let Some(item) = receiver.take(&shutdown).await {
            match chain.apply(item.message) {
                Ok(ChainOutcome::Delivered(message)) => {
                    stats.record_processed();
                    if !sink.emit(message, None) {
                        stats.record_send_failure();
                    }
                }
                Ok(ChainOutcome::LoopDetected { stage, .. }) => {
                    stats.record_loop_drop();
                    debug!(forwarder = %stage_id, %stage, "loop detected in chain, dropping");
                }
                Err(e) => {
                    error!(forwarder = %stage_id, error = %e, "interceptor failed, dropping message");
                }
            }
        }
        debug!(forwarder = %stage_id, "relay worker exited");
    }
}

struct OutboundSink(Arc<dyn Outbound>);

impl Sends for OutboundSink {
    fn outbound(&self) -> &dyn Outbound {
        self.0.as_ref()
    }
}

impl Sends for Forwarder {
    fn outbound(&self) -> &dyn Outbound {
        self.outbound.as_ref()
    }
}

#[async_trait]
impl Receives for Forwarder {
    async fn on_message(&self, message: Message) {
        self.offer(message);
    }
}

#[async_trait]
impl Plugin for Forwarder {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(RelayError::Lifecycle(format!("{} already stopped", self.name)));
        }
        let receiver = self.receiver.lock().await.take().ok_or_else(|| {
            RelayError::Lifecycle(format!("{} already started", self.name))
        })?;

        let handle = tokio::spawn(Self::run_worker(
            receiver,
            self.chain.clone(),
            self.outbound.clone(),
            self.stats.clone(),
            self.shutdown.clone(),
            self.stage_id.clone(),
        ));
        *self.worker.lock().await = Some(handle);

        info!(
            forwarder = %self.stage_id,
            input_groups = ?self.config.input_groups,
            output_groups = ?self.config.output_groups,
            queue_size = self.config.queue_size,
            "forwarder started"
        );
        Ok(())
    }

    async fn stop(&self) {
        self.shutdown.cancel();
        let abandoned = self.queue.len();
        let Some(handle) = self.worker.lock().await.take() else {
            debug!(forwarder = %self.stage_id, "stop before start");
            return;
        };

        let abort = handle.abort_handle();
        match tokio::time::timeout(STOP_GRACE, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(forwarder = %self.stage_id, error = %e, "relay worker failed"),
            Err(_) => {
                abort.abort();
                warn!(forwarder = %self.stage_id, "relay worker did not stop in time, aborted");
            }
        }

        info!(
            forwarder = %self.stage_id,
            abandoned,
            stats = ?self.stats.snapshot(),
            "forwarder stopped"
        );
    }
}
