use super::Broker;
use super::message::Publication;
use super::topic::Topic;
use crate::client::Client;
use crate::transport::message::ServerMessage;
use tokio::sync::mpsc;
use tungstenite::protocol::Message as WsMessage;

fn connect(broker: &mut Broker) -> (String, mpsc::UnboundedReceiver<WsMessage>) {
    let (tx, rx) = mpsc::unbounded_channel::<WsMessage>();
    let client = Client::new(tx);
    let id = client.id.clone();
    broker.register_client(client);
    (id, rx)
}

fn decode(frame: WsMessage) -> ServerMessage {
    serde_json::from_str(frame.to_text().unwrap()).unwrap()
}

#[test]
fn topic_subscribe_and_unsubscribe() {
    let mut topic = Topic::new("test_topic");
    assert!(topic.subscribe("client1".to_string()));
    assert!(!topic.subscribe("client1".to_string()));
    assert!(topic.subscribers.contains("client1"));

    assert!(topic.unsubscribe(&"client1".to_string()));
    assert!(topic.is_empty());
}

#[test]
fn broker_register_and_remove_client() {
    let mut broker = Broker::new();
    let (client_id, _rx) = connect(&mut broker);
    assert_eq!(broker.client_count(), 1);

    broker.remove_client(&client_id);
    assert_eq!(broker.client_count(), 0);
}

#[test]
fn broker_subscribe_and_unsubscribe() {
    let mut broker = Broker::new();
    let (client_id, _rx) = connect(&mut broker);

    broker.subscribe("tak-in", client_id.clone());
    assert_eq!(broker.subscriber_count("tak-in"), 1);

    broker.unsubscribe("tak-in", &client_id);
    assert_eq!(broker.subscriber_count("tak-in"), 0);
    assert_eq!(broker.subscriber_count("never-created"), 0);
}

#[test]
fn broker_publish_fans_out_to_subscribers_only() {
    let mut broker = Broker::new();
    let (a, mut rx_a) = connect(&mut broker);
    let (b, mut rx_b) = connect(&mut broker);
    let (_c, mut rx_c) = connect(&mut broker);
    broker.subscribe("tak-in", a);
    broker.subscribe("tak-in", b);

    let delivered = broker
        .publish(Publication {
            topic: "tak-in".to_string(),
            key: Some("uid-1".to_string()),
            payload: "hello".to_string(),
            timestamp: 42,
        })
        .unwrap();
    assert_eq!(delivered, 2);

    let expected = ServerMessage::Message {
        topic: "tak-in".to_string(),
        key: Some("uid-1".to_string()),
        payload: "hello".to_string(),
        timestamp: 42,
    };
    assert_eq!(decode(rx_a.try_recv().unwrap()), expected);
    assert_eq!(decode(rx_b.try_recv().unwrap()), expected);
    assert!(rx_c.try_recv().is_err());
}

#[test]
fn publish_to_unknown_topic_delivers_nothing() {
    let broker = Broker::new();
    let delivered = broker
        .publish(Publication::now("nobody", None, "x"))
        .unwrap();
    assert_eq!(delivered, 0);
}

#[test]
fn publish_skips_closed_client() {
    let mut broker = Broker::new();
    let (a, rx_a) = connect(&mut broker);
    broker.subscribe("t", a);
    drop(rx_a);

    assert_eq!(broker.publish(Publication::now("t", None, "x")).unwrap(), 0);
}

#[test]
fn cleanup_client_removes_subscriptions_and_empty_topics() {
    let mut broker = Broker::new();
    let (a, _rx_a) = connect(&mut broker);
    let (b, _rx_b) = connect(&mut broker);
    broker.subscribe("t1", a.clone());
    broker.subscribe("t2", a.clone());
    broker.subscribe("t2", b);

    broker.cleanup_client(&a);
    assert_eq!(broker.client_count(), 1);
    assert_eq!(broker.subscriber_count("t1"), 0);
    assert_eq!(broker.subscriber_count("t2"), 1);
    assert_eq!(broker.topic_count(), 1);
}
