use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::info;

use crate::message::Message;
use crate::plugin::Receives;

/// Logs every message it is handed.
#[derive(Debug, Default)]
pub struct LoggingReceiver {
    received: AtomicU64,
}

impl LoggingReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Receives for LoggingReceiver {
    async fn on_message(&self, message: Message) {
        let n = self.received.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            n,
            uid = %message.payload().uid,
            kind = %message.payload().event_type,
            groups = ?message.groups(),
            provenance = ?message.provenance(),
            detail = message.xml_detail(),
            "received message"
        );
    }
}
