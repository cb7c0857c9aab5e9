//! Bridge between the relay and an external pub/sub broker.
//!
//! Inbound, a poll loop on its own task fetches records from the consumer
//! topic, converts each to a [`Message`] and hands it to the host. Outbound,
//! every message delivered to the bridge is converted to text, published to
//! the producer topic and flushed before `on_message` returns.
//!
//! Lifecycle: `Created -> Running -> Stopping -> Stopped`. `stop` closes the
//! poll loop through its [`ConsumerWaker`] and then releases the producer,
//! all against a single deadline one fetch timeout away. It returns by then
//! even if a fetch, a publish or the broker itself is stuck. The consumer and
//! the producer are each released exactly once: closed when they answer in
//! time, otherwise dropped with the task or the publish that still owns them.

mod consumer;
mod ws;

pub use consumer::{
    BrokerConnector, BrokerConsumer, BrokerProducer, BrokerRecord, ConsumerWaker, run_poll_loop,
};
pub use ws::{WsBrokerConsumer, WsBrokerProducer, WsConnector};

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, error, info, warn};

use crate::config::BridgeSettings;
use crate::message::{Message, MessageConverter};
use crate::plugin::{Outbound, Plugin, Receives, Sends};
use crate::utils::{RelayError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    pub url: String,
    pub consumer_topic: String,
    pub producer_topic: String,
    pub group_id: String,
    pub poll_timeout: Duration,
    pub max_batch: usize,
    pub groups: BTreeSet<String>,
}

fn required(value: &Option<String>, key: &str) -> Result<String> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(RelayError::Config(format!("bridge.{key} is required"))),
    }
}

impl BridgeConfig {
    pub fn from_settings(settings: &BridgeSettings) -> Result<Self> {
        if settings.poll_timeout_ms == 0 {
            return Err(RelayError::Config(
                "bridge.poll_timeout_ms must be a positive integer".to_string(),
            ));
        }
        if settings.max_batch == 0 {
            return Err(RelayError::Config(
                "bridge.max_batch must be a positive integer".to_string(),
            ));
        }
        if settings.group_id.trim().is_empty() {
            return Err(RelayError::Config("bridge.group_id is required".to_string()));
        }
        Ok(Self {
            url: required(&settings.url, "url")?,
            consumer_topic: required(&settings.consumer_topic, "consumer_topic")?,
            producer_topic: required(&settings.producer_topic, "producer_topic")?,
            group_id: settings.group_id.clone(),
            poll_timeout: Duration::from_millis(settings.poll_timeout_ms),
            max_batch: settings.max_batch,
            groups: settings.groups.clone(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Created,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BridgeState::Created => "created",
            BridgeState::Running => "running",
            BridgeState::Stopping => "stopping",
            BridgeState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Default)]
struct BridgeCounters {
    inbound: AtomicU64,
    conversion_failures: AtomicU64,
    published: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub inbound: u64,
    pub conversion_failures: u64,
    pub published: u64,
}

struct Lifecycle {
    state: BridgeState,
    waker: Option<ConsumerWaker>,
    poll_task: Option<JoinHandle<Result<()>>>,
}

/// Shared so a publish can run without holding the slot; `stop` empties the
/// slot and never waits on a publish past its deadline.
type SharedProducer = Arc<Mutex<Box<dyn BrokerProducer>>>;

pub struct BrokerBridge {
    name: String,
    config: BridgeConfig,
    connector: Arc<dyn BrokerConnector>,
    converter: Arc<dyn MessageConverter>,
    outbound: Arc<dyn Outbound>,
    lifecycle: Mutex<Lifecycle>,
    producer: Mutex<Option<SharedProducer>>,
    counters: Arc<BridgeCounters>,
}

impl BrokerBridge {
    pub fn new(
        config: BridgeConfig,
        connector: Arc<dyn BrokerConnector>,
        converter: Arc<dyn MessageConverter>,
        outbound: Arc<dyn Outbound>,
    ) -> Self {
        Self {
            name: format!("bridge:{}", config.group_id),
            config,
            connector,
            converter,
            outbound,
            lifecycle: Mutex::new(Lifecycle {
                state: BridgeState::Created,
                waker: None,
                poll_task: None,
            }),
            producer: Mutex::new(None),
            counters: Arc::new(BridgeCounters::default()),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub async fn state(&self) -> BridgeState {
        self.lifecycle.lock().await.state
    }

    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            inbound: self.counters.inbound.load(Ordering::Relaxed),
            conversion_failures: self.counters.conversion_failures.load(Ordering::Relaxed),
            published: self.counters.published.load(Ordering::Relaxed),
        }
    }

    /// Callback run by the poll loop for every inbound record.
    fn inbound_handler(&self) -> impl FnMut(BrokerRecord) + Send + 'static {
        let converter = self.converter.clone();
        let outbound = self.outbound.clone();
        let counters = self.counters.clone();
        let groups = self.config.groups.clone();
        let source_id = self.config.group_id.clone();

        move |record: BrokerRecord| {
            counters.inbound.fetch_add(1, Ordering::Relaxed);
            let message = match converter.text_to_message(&record.value, &groups, &source_id) {
                Ok(message) => message,
                Err(e) => {
                    counters.conversion_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(topic = %record.topic, key = ?record.key, error = %e, "dropping inbound record");
                    return;
                }
            };
            if let Err(e) = outbound.send(message) {
                error!(topic = %record.topic, error = %e, "handing inbound message to host failed");
            }
        }
    }

    async fn publish(&self, message: &Message) -> Result<()> {
        let value = self.converter.message_to_text(message)?;
        let Some(producer) = self.producer.lock().await.clone() else {
            return Err(RelayError::Lifecycle("bridge producer not available".to_string()));
        };
        let mut producer = producer.lock().await;
        producer
            .send(BrokerRecord {
                topic: self.config.producer_topic.clone(),
                key: Some(message.payload().uid.clone()),
                value,
            })
            .await?;
        producer.flush().await
    }

    /// Flush and close the producer, giving up at `deadline`.
    async fn release_producer(&self, deadline: Instant) {
        let Some(shared) = self.producer.lock().await.take() else {
            return;
        };
        let Ok(mut producer) = timeout_at(deadline, shared.lock()).await else {
            warn!(bridge = %self.name, "producer still busy with a publish, dropping it");
            return;
        };
        match timeout_at(deadline, producer.flush()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(bridge = %self.name, error = %e, "final producer flush failed"),
            Err(_) => warn!(bridge = %self.name, "final producer flush timed out"),
        }
        match timeout_at(deadline, producer.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(bridge = %self.name, error = %e, "closing broker producer failed"),
            Err(_) => warn!(bridge = %self.name, "closing broker producer timed out, dropping it"),
        }
    }
}

impl Sends for BrokerBridge {
    fn outbound(&self) -> &dyn Outbound {
        self.outbound.as_ref()
    }
}

#[async_trait]
impl Receives for BrokerBridge {
    async fn on_message(&self, message: Message) {
        match self.publish(&message).await {
            Ok(()) => {
                self.counters.published.fetch_add(1, Ordering::Relaxed);
                debug!(bridge = %self.name, topic = %self.config.producer_topic, "published message");
            }
            Err(RelayError::Conversion(e)) => {
                warn!(bridge = %self.name, error = %e, "dropping outbound message");
            }
            Err(e) => error!(bridge = %self.name, error = %e, "publish to broker failed"),
        }
    }
}

#[async_trait]
impl Plugin for BrokerBridge {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.state != BridgeState::Created {
            return Err(RelayError::Lifecycle(format!(
                "{} cannot start from state {}",
                self.name, lifecycle.state
            )));
        }

        let mut consumer = self.connector.consumer(&self.config).await?;
        if let Err(e) = consumer.subscribe(&self.config.consumer_topic).await {
            let _ = consumer.close().await;
            return Err(e);
        }
        let producer = match self.connector.producer(&self.config).await {
            Ok(producer) => producer,
            Err(e) => {
                let _ = consumer.close().await;
                return Err(e);
            }
        };
        *self.producer.lock().await = Some(Arc::new(Mutex::new(producer)));

        let waker = ConsumerWaker::new();
        let loop_waker = waker.clone();
        let timeout = self.config.poll_timeout;
        let on_record = self.inbound_handler();
        let name = self.name.clone();
        let poll_task = tokio::spawn(async move {
            let result = run_poll_loop(consumer.as_mut(), &loop_waker, timeout, on_record).await;
            match &result {
                Ok(()) => debug!(bridge = %name, "poll loop exited"),
                Err(e) => error!(bridge = %name, error = %e, "poll loop failed"),
            }
            result
        });

        lifecycle.waker = Some(waker);
        lifecycle.poll_task = Some(poll_task);
        lifecycle.state = BridgeState::Running;
        info!(
            bridge = %self.name,
            url = %self.config.url,
            consumer_topic = %self.config.consumer_topic,
            producer_topic = %self.config.producer_topic,
            "bridge started"
        );
        Ok(())
    }

    async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        match lifecycle.state {
            BridgeState::Created => {
                lifecycle.state = BridgeState::Stopped;
                return;
            }
            BridgeState::Stopping | BridgeState::Stopped => return,
            BridgeState::Running => lifecycle.state = BridgeState::Stopping,
        }

        let deadline = Instant::now() + self.config.poll_timeout;
        if let Some(waker) = lifecycle.waker.take() {
            waker.close();
        }
        if let Some(poll_task) = lifecycle.poll_task.take() {
            let abort = poll_task.abort_handle();
            match timeout_at(deadline, poll_task).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => error!(bridge = %self.name, error = %e, "poll task panicked"),
                Err(_) => {
                    // the consumer is dropped with the task instead of closed
                    abort.abort();
                    warn!(bridge = %self.name, "poll loop did not exit in time, aborted");
                }
            }
        }

        self.release_producer(deadline).await;
        lifecycle.state = BridgeState::Stopped;
        info!(bridge = %self.name, stats = ?self.stats(), "bridge stopped");
    }
}
