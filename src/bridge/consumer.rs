//! Broker client seams and the inbound poll loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::{debug, warn};

use super::BridgeConfig;
use crate::utils::{RelayError, Result};

/// A topic-addressed record as carried by the external broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerRecord {
    pub topic: String,
    pub key: Option<String>,
    pub value: String,
}

/// Consumer half of a broker connection. Owned by exactly one poll loop.
#[async_trait]
pub trait BrokerConsumer: Send {
    async fn subscribe(&mut self, topic: &str) -> Result<()>;

    /// Fetch the next batch, waiting at most `timeout`. An empty batch means
    /// nothing arrived in time. Must be safe to drop mid-call.
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<BrokerRecord>>;

    async fn close(&mut self) -> Result<()>;
}

/// Producer half of a broker connection.
#[async_trait]
pub trait BrokerProducer: Send {
    async fn send(&mut self, record: BrokerRecord) -> Result<()>;

    async fn flush(&mut self) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

/// Opens broker connections for a bridge.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn consumer(&self, config: &BridgeConfig) -> Result<Box<dyn BrokerConsumer>>;

    async fn producer(&self, config: &BridgeConfig) -> Result<Box<dyn BrokerProducer>>;
}

/// Shutdown signal for a poll loop: a closed flag plus a wake interrupt
/// that unblocks a fetch in progress.
///
/// A wake issued while no fetch is running is kept and ends the next one.
#[derive(Debug, Clone, Default)]
pub struct ConsumerWaker {
    closed: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl ConsumerWaker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interrupt the current or next fetch without closing.
    pub fn wakeup(&self) {
        self.wake.notify_one();
    }

    /// Mark the loop closed, then interrupt it.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

enum Fetched {
    Woken,
    Batch(Vec<BrokerRecord>),
}

/// Poll `consumer` until `waker` is closed, handing every record to
/// `on_record` in batch order.
///
/// A wake interrupt seen while closed ends the loop with `Ok`; seen while
/// not closed it is a fault. Whatever the exit, `consumer` is closed exactly
/// once before returning.
pub async fn run_poll_loop<F>(
    consumer: &mut dyn BrokerConsumer,
    waker: &ConsumerWaker,
    timeout: Duration,
    on_record: F,
) -> Result<()>
where
    F: FnMut(BrokerRecord),
{
    let result = poll_until_closed(consumer, waker, timeout, on_record).await;
    if let Err(e) = consumer.close().await {
        warn!(error = %e, "closing broker consumer failed");
    }
    result
}

async fn poll_until_closed<F>(
    consumer: &mut dyn BrokerConsumer,
    waker: &ConsumerWaker,
    timeout: Duration,
    mut on_record: F,
) -> Result<()>
where
    F: FnMut(BrokerRecord),
{
    while !waker.is_closed() {
        let fetched = tokio::select! {
            biased;
            _ = waker.wake.notified() => Fetched::Woken,
            batch = consumer.poll(timeout) => Fetched::Batch(batch?),
        };
        match fetched {
            Fetched::Woken if waker.is_closed() => {
                debug!("poll loop woken for shutdown");
                return Ok(());
            }
            Fetched::Woken => return Err(RelayError::UnexpectedWakeup),
            Fetched::Batch(records) => {
                if !records.is_empty() {
                    debug!(count = records.len(), "fetched batch");
                }
                for record in records {
                    on_record(record);
                }
            }
        }
    }
    Ok(())
}
