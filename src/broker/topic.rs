use std::collections::HashSet;

pub type SubscriberId = String;

/// A named topic and the ids of the clients subscribed to it.
#[derive(Debug, Default)]
pub struct Topic {
    pub name: String,
    pub subscribers: HashSet<SubscriberId>,
}

impl Topic {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            subscribers: HashSet::new(),
        }
    }

    /// Returns `false` if `id` was already subscribed.
    pub fn subscribe(&mut self, id: SubscriberId) -> bool {
        self.subscribers.insert(id)
    }

    pub fn unsubscribe(&mut self, id: &SubscriberId) -> bool {
        self.subscribers.remove(id)
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}
