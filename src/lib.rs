//! # relaysub
//!
//! `relaysub` relays situational-awareness messages between an in-process
//! host and an external pub/sub broker.
//!
//! ## Core Modules
//!
//! - `message`: the immutable `Message` envelope and the text converters used at the broker boundary.
//! - `provenance`: loop prevention through each message's record of the stages that processed it.
//! - `intercept`: ordered interceptor chains and the counter / UUID stages.
//! - `plugin`: the capability traits (`Sends`, `Receives`, `Intercepts`, `Plugin`) components are assembled from.
//! - `queue`: the bounded, drop-new relay queue and its counters.
//! - `forwarder`: group-filtering relay draining a queue on a single worker.
//! - `scheduler`: periodic and one-shot tasks with cooperative cancellation.
//! - `sender`: a periodic message source and a logging sink.
//! - `bridge`: consumer poll loop and producer for an external broker, with graceful stop.
//! - `broker`, `client`, `transport`: a small embedded WebSocket broker the bridge can talk to.
//! - `router`: an in-process host that delivers messages between components.
//! - `config`, `utils`: configuration loading, errors and logging.

pub mod bridge;
pub mod broker;
pub mod client;
pub mod config;
pub mod forwarder;
pub mod intercept;
pub mod message;
pub mod plugin;
pub mod provenance;
pub mod queue;
pub mod router;
pub mod scheduler;
pub mod sender;
pub mod transport;
pub mod utils;

pub use bridge::BrokerBridge;
pub use forwarder::Forwarder;
pub use message::Message;
pub use router::LocalRouter;
pub use utils::{RelayError, Result};

#[cfg(test)]
mod tests;
