//! Capability traits components are assembled from.
//!
//! A component implements only the capabilities it has: a forwarder
//! [`Sends`] and [`Receives`], an interceptor stage only [`Intercepts`], the
//! broker bridge [`Sends`] and [`Receives`]. Every runnable component also
//! implements [`Plugin`] for its lifecycle.

use async_trait::async_trait;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::error;

use crate::message::Message;
use crate::provenance::StageId;
use crate::utils::{RelayError, Result};

/// Outbound send API offered by the host runtime. Fire-and-forget: an
/// implementation must not block the caller.
pub trait Outbound: Send + Sync {
    fn send(&self, message: Message) -> Result<()>;

    fn send_to_feed(&self, message: Message, feed_id: &str) -> Result<()>;
}

/// A component that emits messages through the host's outbound API.
pub trait Sends {
    fn outbound(&self) -> &dyn Outbound;

    /// Hand `message` to the host, optionally targeting a data feed.
    /// Failures are logged and reported as `false`; provenance already
    /// stamped on the message is not rolled back.
    fn emit(&self, message: Message, feed_id: Option<&str>) -> bool {
        let result = match feed_id {
            Some(feed) => self.outbound().send_to_feed(message, feed),
            None => self.outbound().send(message),
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, feed = ?feed_id, "outbound send failed");
                false
            }
        }
    }
}

/// A component that accepts messages pushed by the host. Implementations
/// return quickly; long work belongs on the component's own worker.
#[async_trait]
pub trait Receives: Send + Sync {
    async fn on_message(&self, message: Message);
}

/// A transform stage applied to a message before it leaves the stage.
pub trait Intercepts: Send + Sync {
    fn stage_id(&self) -> &StageId;

    /// Build the transformed message. Must not be called for a message that
    /// already carries this stage's provenance; the chain enforces that.
    fn intercept(&self, message: &Message) -> Result<Message>;
}

/// Lifecycle shared by runnable components.
///
/// `stop` is safe to call before `start` and never fails; faults seen while
/// stopping are logged.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    async fn start(&self) -> Result<()>;

    async fn stop(&self);
}

/// A message handed to an [`Outbound`], with its optional feed target.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub message: Message,
    pub feed_id: Option<String>,
}

/// [`Outbound`] that pushes deliveries onto an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelOutbound {
    sender: UnboundedSender<Delivery>,
}

impl ChannelOutbound {
    pub fn new() -> (Self, UnboundedReceiver<Delivery>) {
        let (sender, receiver) = unbounded_channel();
        (Self { sender }, receiver)
    }

    fn push(&self, message: Message, feed_id: Option<String>) -> Result<()> {
        self.sender
            .send(Delivery { message, feed_id })
            .map_err(|_| RelayError::Send("outbound channel closed".to_string()))
    }
}

impl Outbound for ChannelOutbound {
    fn send(&self, message: Message) -> Result<()> {
        self.push(message, None)
    }

    fn send_to_feed(&self, message: Message, feed_id: &str) -> Result<()> {
        self.push(message, Some(feed_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{CotEvent, MessageBuilder};

    struct Emitter {
        outbound: ChannelOutbound,
    }

    impl Sends for Emitter {
        fn outbound(&self) -> &dyn Outbound {
            &self.outbound
        }
    }

    fn message() -> Message {
        MessageBuilder::new(CotEvent::situational_awareness("uid-1", "alpha")).build()
    }

    #[test]
    fn emit_routes_feed_target() {
        let (outbound, mut rx) = ChannelOutbound::new();
        let emitter = Emitter { outbound };

        assert!(emitter.emit(message(), None));
        assert!(emitter.emit(message(), Some("feed-1")));

        assert_eq!(rx.try_recv().unwrap().feed_id, None);
        assert_eq!(rx.try_recv().unwrap().feed_id.as_deref(), Some("feed-1"));
    }

    #[test]
    fn emit_reports_closed_channel() {
        let (outbound, rx) = ChannelOutbound::new();
        drop(rx);
        let emitter = Emitter { outbound };

        assert!(!emitter.emit(message(), None));
    }
}
