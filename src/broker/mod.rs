//! Embedded in-memory broker.
//!
//! Topic-addressed fan-out to connected clients. Nothing is stored: a
//! record published to a topic with no subscribers is gone.

pub mod engine;
pub mod message;
pub mod topic;

pub use engine::Broker;
pub use message::Publication;

#[cfg(test)]
mod tests;
