use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio_tungstenite::connect_async;
use tokio_util::sync::CancellationToken;
use tungstenite::protocol::Message as WsMessage;

use crate::bridge::{BridgeConfig, BridgeState, BrokerBridge, WsConnector};
use crate::broker::Broker;
use crate::message::{CotEvent, JsonConverter, MessageBuilder, MessageConverter};
use crate::plugin::{ChannelOutbound, Plugin, Receives};
use crate::transport::BrokerServer;
use crate::transport::websocket::lock;

struct Running {
    url: String,
    broker: Arc<Mutex<Broker>>,
    shutdown: CancellationToken,
}

async fn start_broker() -> Running {
    let server = BrokerServer::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", server.local_addr().unwrap());
    let broker = server.broker();
    let shutdown = CancellationToken::new();
    tokio::spawn(server.run(shutdown.clone()));
    Running {
        url,
        broker,
        shutdown,
    }
}

fn bridge_config(url: &str) -> BridgeConfig {
    BridgeConfig {
        url: url.to_string(),
        consumer_topic: "tak-in".to_string(),
        producer_topic: "tak-out".to_string(),
        group_id: "relaysub-it".to_string(),
        poll_timeout: Duration::from_secs(5),
        max_batch: 500,
        groups: ["Blue".to_string()].into_iter().collect(),
    }
}

async fn wait_for_subscribers(broker: &Mutex<Broker>, topic: &str, n: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while lock(broker).subscriber_count(topic) < n {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("subscribers never showed up");
}

#[tokio::test]
async fn bridge_round_trip_over_embedded_broker() {
    let running = start_broker().await;
    let (outbound, mut delivered) = ChannelOutbound::new();
    let bridge = BrokerBridge::new(
        bridge_config(&running.url),
        Arc::new(WsConnector),
        Arc::new(JsonConverter),
        Arc::new(outbound),
    );
    bridge.start().await.unwrap();

    let (mut external, _) = connect_async(running.url.as_str()).await.unwrap();
    external
        .send(WsMessage::text(
            json!({"type": "subscribe", "topic": "tak-out"}).to_string(),
        ))
        .await
        .unwrap();
    wait_for_subscribers(&running.broker, "tak-in", 1).await;
    wait_for_subscribers(&running.broker, "tak-out", 1).await;

    // inbound: external publisher -> broker -> bridge -> host
    let inbound = MessageBuilder::new(CotEvent::situational_awareness("ANDROID-1", "coolata"))
        .add_group("Red")
        .add_dest_callsigns(["bravo"])
        .build();
    let text = JsonConverter.message_to_text(&inbound).unwrap();
    external
        .send(WsMessage::text(
            json!({"type": "publish", "topic": "tak-in", "key": "ANDROID-1", "payload": text})
                .to_string(),
        ))
        .await
        .unwrap();

    let received = tokio::time::timeout(Duration::from_secs(5), delivered.recv())
        .await
        .unwrap()
        .unwrap()
        .message;
    assert_eq!(received.payload().uid, "ANDROID-1");
    assert_eq!(received.destinations(), inbound.destinations());
    let blue: BTreeSet<String> = ["Blue".to_string()].into_iter().collect();
    assert_eq!(received.groups(), &blue);
    assert_eq!(received.source(), Some("relaysub-it"));

    // outbound: host -> bridge -> broker -> external subscriber
    bridge.on_message(received.clone()).await;
    let frame = tokio::time::timeout(Duration::from_secs(5), external.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let value: serde_json::Value = serde_json::from_str(frame.to_text().unwrap()).unwrap();
    assert_eq!(value["type"], "message");
    assert_eq!(value["topic"], "tak-out");
    assert_eq!(value["key"], "ANDROID-1");
    let echoed = JsonConverter
        .text_to_message(value["payload"].as_str().unwrap(), &BTreeSet::new(), "x")
        .unwrap();
    assert_eq!(echoed.payload(), received.payload());

    bridge.stop().await;
    running.shutdown.cancel();
}

#[tokio::test]
async fn bridge_stop_with_idle_consumer_is_prompt() {
    let running = start_broker().await;
    let (outbound, _delivered) = ChannelOutbound::new();
    let bridge = BrokerBridge::new(
        bridge_config(&running.url),
        Arc::new(WsConnector),
        Arc::new(JsonConverter),
        Arc::new(outbound),
    );
    bridge.start().await.unwrap();
    wait_for_subscribers(&running.broker, "tak-in", 1).await;

    let started = Instant::now();
    bridge.stop().await;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(bridge.state().await, BridgeState::Stopped);

    // the consumer connection is gone from the broker
    tokio::time::timeout(Duration::from_secs(5), async {
        while lock(&running.broker).subscriber_count("tak-in") > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    running.shutdown.cancel();
}

#[tokio::test]
async fn bridge_start_fails_without_broker() {
    let (outbound, _delivered) = ChannelOutbound::new();
    let bridge = BrokerBridge::new(
        bridge_config("ws://127.0.0.1:1"),
        Arc::new(WsConnector),
        Arc::new(JsonConverter),
        Arc::new(outbound),
    );
    assert!(bridge.start().await.is_err());
    bridge.stop().await;
}
