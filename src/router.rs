//! In-process host runtime.
//!
//! [`LocalRouter`] is the [`Outbound`] every component sends through. A
//! single dispatch task runs each delivery through the host interceptor
//! chain and pushes the result to every registered receiver, in
//! registration order.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::intercept::{ChainOutcome, InterceptorChain};
use crate::message::Message;
use crate::plugin::{Delivery, Outbound, Plugin, Receives};
use crate::utils::{RelayError, Result};

const STOP_GRACE: Duration = Duration::from_secs(5);

pub struct LocalRouter {
    sender: UnboundedSender<Delivery>,
    inbox: Mutex<Option<UnboundedReceiver<Delivery>>>,
    chain: InterceptorChain,
    receivers: Arc<RwLock<Vec<Arc<dyn Receives>>>>,
    shutdown: CancellationToken,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    dispatched: Arc<AtomicU64>,
}

impl LocalRouter {
    pub fn new(chain: InterceptorChain) -> Self {
        let (sender, inbox) = unbounded_channel();
        Self {
            sender,
            inbox: Mutex::new(Some(inbox)),
            chain,
            receivers: Arc::new(RwLock::new(Vec::new())),
            shutdown: CancellationToken::new(),
            dispatcher: Mutex::new(None),
            dispatched: Arc::new(AtomicU64::new(0)),
        }
    }

    pub async fn register(&self, receiver: Arc<dyn Receives>) {
        self.receivers.write().await.push(receiver);
    }

    /// Messages handed to receivers so far.
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    fn enqueue(&self, message: Message, feed_id: Option<String>) -> Result<()> {
        self.sender
            .send(Delivery { message, feed_id })
            .map_err(|_| RelayError::Send("router is not accepting messages".to_string()))
    }

    async fn dispatch(
        mut inbox: UnboundedReceiver<Delivery>,
        chain: InterceptorChain,
        receivers: Arc<RwLock<Vec<Arc<dyn Receives>>>>,
        dispatched: Arc<AtomicU64>,
        shutdown: CancellationToken,
    ) {
        loop {
            let delivery = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                delivery = inbox.recv() => match delivery {
                    Some(delivery) => delivery,
                    None => break,
                },
            };

            let message = match chain.apply(delivery.message) {
                Ok(ChainOutcome::Delivered(message)) => message,
                Ok(ChainOutcome::LoopDetected { stage, message }) => {
                    debug!(%stage, "message already through host chain");
                    message
                }
                Err(e) => {
                    error!(error = %e, "host interceptor failed, dropping message");
                    continue;
                }
            };
            if let Some(feed) = &delivery.feed_id {
                debug!(feed = %feed, uid = %message.payload().uid, "data feed delivery");
            }

            let receivers = receivers.read().await.clone();
            for receiver in receivers {
                receiver.on_message(message.clone()).await;
            }
            dispatched.fetch_add(1, Ordering::Relaxed);
        }
        debug!("router dispatch exited");
    }
}

impl Outbound for LocalRouter {
    fn send(&self, message: Message) -> Result<()> {
        self.enqueue(message, None)
    }

    fn send_to_feed(&self, message: Message, feed_id: &str) -> Result<()> {
        self.enqueue(message, Some(feed_id.to_string()))
    }
}

#[async_trait]
impl Plugin for LocalRouter {
    fn name(&self) -> &str {
        "router"
    }

    async fn start(&self) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(RelayError::Lifecycle("router already stopped".to_string()));
        }
        let inbox = self
            .inbox
            .lock()
            .await
            .take()
            .ok_or_else(|| RelayError::Lifecycle("router already started".to_string()))?;

        let handle = tokio::spawn(Self::dispatch(
            inbox,
            self.chain.clone(),
            self.receivers.clone(),
            self.dispatched.clone(),
            self.shutdown.clone(),
        ));
        *self.dispatcher.lock().await = Some(handle);
        let receivers = self.receivers.read().await.len();
        info!(stages = ?self.chain.stage_ids(), receivers, "router started");
        Ok(())
    }

    async fn stop(&self) {
        self.shutdown.cancel();
        let Some(handle) = self.dispatcher.lock().await.take() else {
            return;
        };
        let abort = handle.abort_handle();
        if tokio::time::timeout(STOP_GRACE, handle).await.is_err() {
            abort.abort();
            warn!("router dispatch did not stop in time, aborted");
        }
        info!(dispatched = self.dispatched(), "router stopped");
    }
}
