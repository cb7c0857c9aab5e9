use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::{Broker, Publication};
use crate::client::Client;
use crate::transport::message::{ClientMessage, ServerMessage};
use crate::utils::Result;

/// WebSocket front end of the embedded broker.
pub struct BrokerServer {
    listener: TcpListener,
    broker: Arc<Mutex<Broker>>,
}

pub(crate) fn lock(broker: &Mutex<Broker>) -> MutexGuard<'_, Broker> {
    broker.lock().unwrap_or_else(PoisonError::into_inner)
}

impl BrokerServer {
    /// Bind the listener. Port `0` picks an ephemeral port; see [`local_addr`](Self::local_addr).
    pub async fn bind(addr: &str) -> Result<Self> {
        Self::bind_with(addr, Arc::new(Mutex::new(Broker::new()))).await
    }

    pub async fn bind_with(addr: &str, broker: Arc<Mutex<Broker>>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, broker })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn broker(&self) -> Arc<Mutex<Broker>> {
        self.broker.clone()
    }

    /// Accept connections until `shutdown` fires. Open connections are
    /// closed on shutdown as well.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        info!(addr = %self.local_addr()?, "broker listening");
        loop {
            let accepted = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, peer)) => {
                    tokio::spawn(handle_connection(
                        stream,
                        peer,
                        self.broker.clone(),
                        shutdown.child_token(),
                    ));
                }
                Err(e) => warn!(error = %e, "accept failed"),
            }
        }
        info!("broker stopped");
        Ok(())
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    broker: Arc<Mutex<Broker>>,
    shutdown: CancellationToken,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(%peer, error = %e, "websocket handshake failed");
            return;
        }
    };
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
    let client = Client::new(tx.clone());
    let client_id = client.id.clone();
    lock(&broker).register_client(client);
    debug!(client = %client_id, %peer, "client connected");

    let writer = {
        let client_id = client_id.clone();
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Err(e) = ws_sender.send(frame).await {
                    debug!(client = %client_id, error = %e, "send to client failed");
                    break;
                }
            }
            let _ = ws_sender.close().await;
        })
    };

    loop {
        let frame = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            frame = ws_receiver.next() => frame,
        };
        match frame {
            Some(Ok(WsMessage::Text(text))) => {
                if let Some(reply) = handle_frame(&broker, &client_id, text.as_str()) {
                    match serde_json::to_string(&reply) {
                        Ok(json) => {
                            let _ = tx.send(WsMessage::text(json));
                        }
                        Err(e) => error!(error = %e, "cannot encode reply"),
                    }
                }
            }
            Some(Ok(WsMessage::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                debug!(client = %client_id, error = %e, "read from client failed");
                break;
            }
        }
    }

    lock(&broker).cleanup_client(&client_id);
    // last sender gone: the writer drains what is queued and closes
    drop(tx);
    let _ = writer.await;
    debug!(client = %client_id, "client disconnected");
}

/// Apply one client frame to the broker. Returns a reply for the client,
/// if any.
pub(crate) fn handle_frame(
    broker: &Mutex<Broker>,
    client_id: &str,
    text: &str,
) -> Option<ServerMessage> {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Subscribe { topic }) => {
            lock(broker).subscribe(&topic, client_id.to_string());
            None
        }
        Ok(ClientMessage::Unsubscribe { topic }) => {
            lock(broker).unsubscribe(&topic, &client_id.to_string());
            None
        }
        Ok(ClientMessage::Publish {
            topic,
            key,
            payload,
        }) => {
            let publication = Publication::now(topic, key, payload);
            match lock(broker).publish(publication) {
                Ok(n) => {
                    debug!(client = %client_id, delivered = n, "published");
                    None
                }
                Err(e) => Some(ServerMessage::Error {
                    message: e.to_string(),
                }),
            }
        }
        Err(e) => {
            warn!(
                client = %client_id,
                error = %e,
                frame = %text.chars().take(100).collect::<String>(),
                "invalid client message"
            );
            Some(ServerMessage::Error {
                message: format!("invalid message: {e}"),
            })
        }
    }
}
