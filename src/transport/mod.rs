//! Network side of the embedded broker: the JSON wire protocol and the
//! WebSocket server that feeds client frames into a [`Broker`](crate::broker::Broker).

pub mod message;
pub mod websocket;

pub use websocket::BrokerServer;

#[cfg(test)]
mod tests;
