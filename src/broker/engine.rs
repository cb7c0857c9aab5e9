use std::collections::HashMap;

use tracing::{debug, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::message::Publication;
use crate::broker::topic::{SubscriberId, Topic};
use crate::client::Client;
use crate::transport::message::ServerMessage;
use crate::utils::Result;

/// Topic registry and connected clients.
///
/// The broker never blocks on a client: delivery is a push onto the
/// client's unbounded outgoing channel, drained by that connection's own
/// writer task.
#[derive(Debug, Default)]
pub struct Broker {
    topics: HashMap<String, Topic>,
    clients: HashMap<SubscriberId, Client>,
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_client(&mut self, client: Client) {
        debug!(client = %client.id, "client registered");
        self.clients.insert(client.id.clone(), client);
    }

    pub fn remove_client(&mut self, client_id: &SubscriberId) {
        self.clients.remove(client_id);
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Subscribe `subscriber` to `topic`, creating the topic on first use.
    pub fn subscribe(&mut self, topic: &str, subscriber: SubscriberId) {
        let entry = self
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| Topic::new(topic));
        if entry.subscribe(subscriber.clone()) {
            debug!(client = %subscriber, topic, "subscribed");
        }
    }

    pub fn unsubscribe(&mut self, topic: &str, subscriber: &SubscriberId) {
        if let Some(t) = self.topics.get_mut(topic) {
            if t.unsubscribe(subscriber) {
                debug!(client = %subscriber, topic, "unsubscribed");
            }
        }
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map_or(0, |t| t.subscribers.len())
    }

    /// Deliver `publication` to every subscriber of its topic. Returns the
    /// number of clients it was handed to.
    pub fn publish(&self, publication: Publication) -> Result<usize> {
        let Some(topic) = self.topics.get(&publication.topic) else {
            debug!(topic = %publication.topic, "no subscribers, dropping publication");
            return Ok(0);
        };

        let frame = WsMessage::text(serde_json::to_string(&ServerMessage::from(publication))?);
        let mut delivered = 0;
        for sub_id in &topic.subscribers {
            match self.clients.get(sub_id) {
                Some(client) => {
                    if client.sender.send(frame.clone()).is_ok() {
                        delivered += 1;
                    } else {
                        warn!(client = %sub_id, "client channel closed");
                    }
                }
                None => warn!(client = %sub_id, "no client registered with id"),
            }
        }
        Ok(delivered)
    }

    /// Remove a client and all of its subscriptions. Topics left without
    /// subscribers are dropped.
    pub fn cleanup_client(&mut self, client_id: &SubscriberId) {
        self.remove_client(client_id);
        for topic in self.topics.values_mut() {
            topic.unsubscribe(client_id);
        }
        self.topics.retain(|_, t| !t.is_empty());
        debug!(client = %client_id, "client cleaned up");
    }
}
