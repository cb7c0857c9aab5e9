//! Bounded relay queue.
//!
//! A fixed-capacity buffer between a producer that must never block (the
//! host's inbound delivery) and exactly one consumer worker. When the buffer
//! is full `offer` refuses the message: a slow consumer loses data instead of
//! stalling the producer or growing memory without bound.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use crate::message::Message;
use crate::utils::{RelayError, Result};

pub const DEFAULT_QUEUE_SIZE: usize = 1000;

#[derive(Debug, Clone)]
pub struct QueueItem {
    pub message: Message,
    pub enqueued_at: DateTime<Utc>,
}

/// Producer side. Cheap to share by reference; `offer` never waits.
#[derive(Debug)]
pub struct RelayQueue {
    sender: mpsc::Sender<QueueItem>,
}

/// Consumer side. There is exactly one per queue.
#[derive(Debug)]
pub struct QueueReceiver {
    receiver: mpsc::Receiver<QueueItem>,
}

impl RelayQueue {
    pub fn new(capacity: usize) -> Result<(Self, QueueReceiver)> {
        if capacity == 0 {
            return Err(RelayError::Config(
                "queue size must be a positive integer".to_string(),
            ));
        }
        let (sender, receiver) = mpsc::channel(capacity);
        Ok((Self { sender }, QueueReceiver { receiver }))
    }

    /// Enqueue without waiting. Returns `false` if the queue is full or the
    /// consumer is gone; the message is dropped in that case.
    pub fn offer(&self, message: Message) -> bool {
        let item = QueueItem {
            message,
            enqueued_at: Utc::now(),
        };
        match self.sender.try_send(item) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => false,
        }
    }

    pub fn len(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.sender.max_capacity()
    }

    pub fn is_full(&self) -> bool {
        self.sender.capacity() == 0
    }
}

impl QueueReceiver {
    /// Wait for the next item. Returns `None` as soon as `shutdown` fires,
    /// even if items are still queued; those are abandoned.
    pub async fn take(&mut self, shutdown: &CancellationToken) -> Option<QueueItem> {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            item = self.receiver.recv() => item,
        }
    }
}

/// Counters kept by a relay. Each drop reason has its own counter so a
/// backpressure loss is never confused with a filtered message.
#[derive(Debug, Default)]
pub struct RelayStats {
    enqueued: AtomicU64,
    dropped_backpressure: AtomicU64,
    dropped_group_filter: AtomicU64,
    dropped_loop: AtomicU64,
    processed: AtomicU64,
    send_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RelayStatsSnapshot {
    pub enqueued: u64,
    pub dropped_backpressure: u64,
    pub dropped_group_filter: u64,
    pub dropped_loop: u64,
    pub processed: u64,
    pub send_failures: u64,
}

impl RelayStats {
    pub fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_backpressure_drop(&self) {
        self.dropped_backpressure.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_group_filter_drop(&self) {
        self.dropped_group_filter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_loop_drop(&self) {
        self.dropped_loop.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dropped_backpressure: self.dropped_backpressure.load(Ordering::Relaxed),
            dropped_group_filter: self.dropped_group_filter.load(Ordering::Relaxed),
            dropped_loop: self.dropped_loop.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
        }
    }
}
