//! Bridge client for the embedded broker's WebSocket protocol.

use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};
use tungstenite::protocol::Message as WsMessage;

use super::BridgeConfig;
use super::consumer::{BrokerConnector, BrokerConsumer, BrokerProducer, BrokerRecord};
use crate::transport::message::{ClientMessage, ServerMessage};
use crate::utils::{RelayError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens one WebSocket connection per consumer and per producer.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

async fn connect(url: &str) -> Result<WsStream> {
    let (stream, _response) = connect_async(url)
        .await
        .map_err(|e| RelayError::broker_with(format!("cannot connect to {url}"), e))?;
    debug!(url, "connected to broker");
    Ok(stream)
}

async fn send_frame(stream: &mut WsStream, frame: &ClientMessage) -> Result<()> {
    let text = serde_json::to_string(frame)?;
    stream
        .feed(WsMessage::text(text))
        .await
        .map_err(|e| RelayError::broker_with("write to broker failed", e))
}

async fn close_stream(stream: &mut WsStream) -> Result<()> {
    match stream.close(None).await {
        Ok(())
        | Err(tungstenite::Error::ConnectionClosed)
        | Err(tungstenite::Error::AlreadyClosed) => Ok(()),
        Err(e) => Err(RelayError::broker_with("closing broker connection failed", e)),
    }
}

#[async_trait]
impl BrokerConnector for WsConnector {
    async fn consumer(&self, config: &BridgeConfig) -> Result<Box<dyn BrokerConsumer>> {
        Ok(Box::new(WsBrokerConsumer {
            stream: connect(&config.url).await?,
            max_batch: config.max_batch,
        }))
    }

    async fn producer(&self, config: &BridgeConfig) -> Result<Box<dyn BrokerProducer>> {
        Ok(Box::new(WsBrokerProducer {
            stream: connect(&config.url).await?,
        }))
    }
}

pub struct WsBrokerConsumer {
    stream: WsStream,
    max_batch: usize,
}

impl WsBrokerConsumer {
    fn push_frame(&self, frame: WsMessage, records: &mut Vec<BrokerRecord>) -> Result<()> {
        let text = match frame {
            WsMessage::Text(text) => text,
            WsMessage::Close(_) => return Err(RelayError::broker("broker closed the connection")),
            _ => return Ok(()),
        };
        match serde_json::from_str::<ServerMessage>(text.as_str()) {
            Ok(ServerMessage::Message {
                topic,
                key,
                payload,
                ..
            }) => records.push(BrokerRecord {
                topic,
                key,
                value: payload,
            }),
            Ok(ServerMessage::Error { message }) => warn!(%message, "broker reported an error"),
            Err(e) => warn!(error = %e, "unreadable frame from broker"),
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerConsumer for WsBrokerConsumer {
    async fn subscribe(&mut self, topic: &str) -> Result<()> {
        send_frame(
            &mut self.stream,
            &ClientMessage::Subscribe {
                topic: topic.to_string(),
            },
        )
        .await?;
        self.stream
            .flush()
            .await
            .map_err(|e| RelayError::broker_with("subscribe failed", e))
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Vec<BrokerRecord>> {
        let first = match time::timeout(timeout, self.stream.next()).await {
            Err(_) => return Ok(Vec::new()),
            Ok(None) => return Err(RelayError::broker("broker connection ended")),
            Ok(Some(Err(e))) => return Err(RelayError::broker_with("read from broker failed", e)),
            Ok(Some(Ok(frame))) => frame,
        };

        let mut records = Vec::new();
        self.push_frame(first, &mut records)?;
        // drain what is already buffered, without waiting
        while records.len() < self.max_batch {
            match self.stream.next().now_or_never() {
                Some(Some(Ok(frame))) => self.push_frame(frame, &mut records)?,
                Some(Some(Err(e))) => {
                    return Err(RelayError::broker_with("read from broker failed", e));
                }
                Some(None) | None => break,
            }
        }
        Ok(records)
    }

    async fn close(&mut self) -> Result<()> {
        close_stream(&mut self.stream).await
    }
}

pub struct WsBrokerProducer {
    stream: WsStream,
}

#[async_trait]
impl BrokerProducer for WsBrokerProducer {
    async fn send(&mut self, record: BrokerRecord) -> Result<()> {
        send_frame(
            &mut self.stream,
            &ClientMessage::Publish {
                topic: record.topic,
                key: record.key,
                payload: record.value,
            },
        )
        .await
    }

    async fn flush(&mut self) -> Result<()> {
        self.stream
            .flush()
            .await
            .map_err(|e| RelayError::broker_with("flush to broker failed", e))
    }

    async fn close(&mut self) -> Result<()> {
        close_stream(&mut self.stream).await
    }
}
