use tokio::sync::mpsc::UnboundedSender;
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

/// One connected WebSocket peer of the broker.
#[derive(Debug)]
pub struct Client {
    /// `client-<uuid>`, unique per connection.
    pub id: String,

    /// Outgoing frames, drained by the connection's writer task.
    pub sender: UnboundedSender<WsMessage>,
}

impl Client {
    pub fn new(sender: UnboundedSender<WsMessage>) -> Self {
        Self {
            id: format!("client-{}", Uuid::new_v4()),
            sender,
        }
    }
}
