//! Scheduled message sources and a logging sink.

mod receiver;

pub use receiver::LoggingReceiver;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::config::SenderSettings;
use crate::intercept::{ChainOutcome, CounterStage, InterceptorChain};
use crate::message::{CotEvent, Message, MessageBuilder};
use crate::plugin::{Outbound, Plugin, Sends};
use crate::provenance::StageId;
use crate::scheduler::{Scheduler, TaskHandle};
use crate::utils::{RelayError, Result};

const STOP_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub struct SenderConfig {
    pub interval: Duration,
    pub initial_delay: Duration,
    pub groups: BTreeSet<String>,
    pub callsigns: Vec<String>,
    pub uids: Vec<String>,
    pub feed_id: Option<String>,
    pub self_stop: Option<Duration>,
}

impl SenderConfig {
    pub fn from_settings(settings: &SenderSettings) -> Result<Self> {
        if settings.interval_ms == 0 {
            return Err(RelayError::Config(
                "sender.interval_ms must be a positive integer".to_string(),
            ));
        }
        if settings.self_stop_secs == Some(0) {
            return Err(RelayError::Config(
                "sender.self_stop_secs must be a positive integer".to_string(),
            ));
        }
        Ok(Self {
            interval: Duration::from_millis(settings.interval_ms),
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            groups: settings.groups.clone(),
            callsigns: settings.callsigns.clone(),
            uids: settings.uids.clone(),
            feed_id: settings.feed_id.clone(),
            self_stop: settings.self_stop_secs.map(Duration::from_secs),
        })
    }
}

/// Sends a position report every `interval`, each carrying an incrementing
/// `<messageCount>`. With `feed_id` set the reports go to that data feed;
/// with `self_stop` set the sender stops itself after that long.
///
/// Cloning yields another handle to the same sender.
#[derive(Clone)]
pub struct PeriodicSender {
    inner: Arc<SenderInner>,
}

struct SenderInner {
    name: String,
    stage_id: StageId,
    config: SenderConfig,
    template: Message,
    counter: Arc<CounterStage>,
    chain: InterceptorChain,
    outbound: Arc<dyn Outbound>,
    scheduler: Arc<Scheduler>,
    tasks: Mutex<Vec<TaskHandle>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl PeriodicSender {
    pub fn new(
        stage_id: StageId,
        config: SenderConfig,
        outbound: Arc<dyn Outbound>,
        scheduler: Arc<Scheduler>,
    ) -> Self {
        let template = MessageBuilder::new(CotEvent::situational_awareness(
            stage_id.as_str(),
            stage_id.as_str(),
        ))
        .groups(config.groups.iter().cloned())
        .add_dest_callsigns(config.callsigns.iter().cloned())
        .add_dest_client_uids(config.uids.iter().cloned())
        .source(stage_id.as_str())
        .build();

        let counter = Arc::new(CounterStage::new(stage_id.clone()));
        let chain = InterceptorChain::new().with_stage(counter.clone());

        Self {
            inner: Arc::new(SenderInner {
                name: format!("sender:{stage_id}"),
                stage_id,
                config,
                template,
                counter,
                chain,
                outbound,
                scheduler,
                tasks: Mutex::new(Vec::new()),
                started: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    /// Number of reports built so far.
    pub fn sent_count(&self) -> u64 {
        self.inner.counter.count()
    }

    pub fn template(&self) -> &Message {
        &self.inner.template
    }
}

impl SenderInner {
    fn send_once(&self) {
        match self.chain.apply(self.template.clone()) {
            Ok(ChainOutcome::Delivered(message)) => {
                let feed = self.config.feed_id.as_deref();
                if self.emit(message, feed) {
                    debug!(sender = %self.stage_id, feed = ?feed, count = self.counter.count(), "report sent");
                }
            }
            Ok(ChainOutcome::LoopDetected { stage, .. }) => {
                error!(sender = %self.stage_id, %stage, "template already carries sender provenance");
            }
            Err(e) => error!(sender = %self.stage_id, error = %e, "failed to build report"),
        }
    }
}

impl Sends for SenderInner {
    fn outbound(&self) -> &dyn Outbound {
        self.outbound.as_ref()
    }
}

impl Sends for PeriodicSender {
    fn outbound(&self) -> &dyn Outbound {
        self.inner.outbound.as_ref()
    }
}

#[async_trait]
impl Plugin for PeriodicSender {
    fn name(&self) -> &str {
        &self.inner.name
    }

    async fn start(&self) -> Result<()> {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return Err(RelayError::Lifecycle(format!(
                "{} already stopped",
                self.inner.name
            )));
        }
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(RelayError::Lifecycle(format!(
                "{} already started",
                self.inner.name
            )));
        }

        let config = &self.inner.config;
        let mut tasks = self.inner.tasks.lock().await;

        let weak: Weak<SenderInner> = Arc::downgrade(&self.inner);
        tasks.push(
            self.inner
                .scheduler
                .schedule(config.initial_delay, config.interval, move || {
                    let weak = weak.clone();
                    async move {
                        if let Some(inner) = weak.upgrade() {
                            inner.send_once();
                        }
                    }
                }),
        );

        if let Some(after) = config.self_stop {
            let weak = Arc::downgrade(&self.inner);
            tasks.push(self.inner.scheduler.schedule_once(after, move || async move {
                if let Some(inner) = weak.upgrade() {
                    info!(sender = %inner.stage_id, "self stop");
                    let sender = PeriodicSender { inner };
                    // stop waits for this task, so it must run elsewhere
                    tokio::spawn(async move { sender.stop().await });
                }
            }));
        }

        info!(
            sender = %self.inner.stage_id,
            interval = ?config.interval,
            feed = ?config.feed_id,
            self_stop = ?config.self_stop,
            "periodic sender started"
        );
        Ok(())
    }

    async fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        let tasks: Vec<TaskHandle> = self.inner.tasks.lock().await.drain(..).collect();
        if tasks.is_empty() {
            return;
        }
        for task in &tasks {
            task.cancel();
        }
        for task in tasks {
            task.cancel_and_wait(STOP_GRACE).await;
        }
        info!(
            sender = %self.inner.stage_id,
            sent = self.inner.counter.count(),
            "periodic sender stopped"
        );
    }
}
