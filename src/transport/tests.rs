use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_util::sync::CancellationToken;
use tungstenite::protocol::Message as WsMessage;

use super::BrokerServer;
use super::message::{ClientMessage, ServerMessage};
use super::websocket::{handle_frame, lock};
use crate::broker::{Broker, Publication};
use crate::client::Client;

fn broker_with_client() -> (Arc<Mutex<Broker>>, String, mpsc::UnboundedReceiver<WsMessage>) {
    let broker = Arc::new(Mutex::new(Broker::new()));
    let (tx, rx) = mpsc::unbounded_channel();
    let client = Client::new(tx);
    let id = client.id.clone();
    lock(&broker).register_client(client);
    (broker, id, rx)
}

#[test]
fn client_message_wire_format() {
    let frame = json!({"type": "publish", "topic": "t", "payload": "p"}).to_string();
    let parsed: ClientMessage = serde_json::from_str(&frame).unwrap();
    assert_eq!(
        parsed,
        ClientMessage::Publish {
            topic: "t".to_string(),
            key: None,
            payload: "p".to_string()
        }
    );

    let keyed = serde_json::to_value(ClientMessage::Publish {
        topic: "t".to_string(),
        key: Some("k".to_string()),
        payload: "p".to_string(),
    })
    .unwrap();
    assert_eq!(keyed["type"], "publish");
    assert_eq!(keyed["key"], "k");
}

#[test]
fn server_message_from_publication() {
    let msg = ServerMessage::from(Publication {
        topic: "t".to_string(),
        key: None,
        payload: "p".to_string(),
        timestamp: 7,
    });
    let value = serde_json::to_value(&msg).unwrap();
    assert_eq!(value["type"], "message");
    assert_eq!(value["timestamp"], 7);
    assert!(value.get("key").is_none());
}

#[test]
fn handle_subscribe_and_unsubscribe() {
    let (broker, id, _rx) = broker_with_client();

    let sub = json!({"type": "subscribe", "topic": "test_topic"}).to_string();
    assert!(handle_frame(&broker, &id, &sub).is_none());
    assert_eq!(lock(&broker).subscriber_count("test_topic"), 1);

    let unsub = json!({"type": "unsubscribe", "topic": "test_topic"}).to_string();
    assert!(handle_frame(&broker, &id, &unsub).is_none());
    assert_eq!(lock(&broker).subscriber_count("test_topic"), 0);
}

#[test]
fn handle_publish_delivers_to_subscriber() {
    let (broker, id, mut rx) = broker_with_client();
    lock(&broker).subscribe("t", id.clone());

    let publish = json!({"type": "publish", "topic": "t", "key": "k1", "payload": "hello"}).to_string();
    assert!(handle_frame(&broker, &id, &publish).is_none());

    let frame = rx.try_recv().unwrap();
    let msg: ServerMessage = serde_json::from_str(frame.to_text().unwrap()).unwrap();
    match msg {
        ServerMessage::Message { topic, key, payload, .. } => {
            assert_eq!(topic, "t");
            assert_eq!(key.as_deref(), Some("k1"));
            assert_eq!(payload, "hello");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn handle_invalid_frame_replies_error() {
    let (broker, id, _rx) = broker_with_client();
    let reply = handle_frame(&broker, &id, "{\"type\":\"bogus\"}");
    assert!(matches!(reply, Some(ServerMessage::Error { .. })));
}

#[tokio::test]
async fn server_round_trip_and_shutdown() {
    let server = BrokerServer::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap();
    let broker = server.broker();
    let shutdown = CancellationToken::new();
    let running = tokio::spawn(server.run(shutdown.clone()));

    let url = format!("ws://{addr}");
    let (mut ws_a, _) = connect_async(url.as_str()).await.unwrap();
    let (mut ws_b, _) = connect_async(url.as_str()).await.unwrap();

    let sub = json!({"type": "subscribe", "topic": "test"}).to_string();
    ws_b.send(WsMessage::text(sub)).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while lock(&broker).subscriber_count("test") == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let publish = json!({"type": "publish", "topic": "test", "payload": "hello world"}).to_string();
    ws_a.send(WsMessage::text(publish)).await.unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(5), ws_b.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_str(frame.to_text().unwrap()).unwrap();
    assert_eq!(parsed["topic"], "test");
    assert_eq!(parsed["payload"], "hello world");

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
