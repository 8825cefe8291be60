use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use topiq_broker::{Broker, Credentials};
use topiq_persistence::MessageStore;
use topiq_wire::frame::{read_frame, write_frame, FrameError};
use topiq_wire::{Message, MessageKind, Topic, WireFormat, MAX_FRAME_LEN};

use crate::serve;

async fn start_broker(auth: Option<Credentials>) -> (std::net::SocketAddr, Arc<Mutex<Broker>>) {
    let store = MessageStore::open("unused", true, WireFormat::Text).unwrap();
    let broker = match auth {
        Some(credentials) => Broker::new_with_auth(store, credentials),
        None => Broker::new(store),
    };
    let broker = Arc::new(Mutex::new(broker));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(listener, broker.clone()));

    (addr, broker)
}

/// Poll the broker until `pred` holds; panics after two seconds.
async fn wait_for(broker: &Arc<Mutex<Broker>>, pred: impl Fn(&Broker) -> bool) {
    for _ in 0..200 {
        if pred(&broker.lock().unwrap()) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("broker never reached the expected state");
}

fn new_topic(name: &str) -> Message {
    Message::builder()
        .kind(MessageKind::NewTopic)
        .topic(Topic::new(name))
        .build()
}

fn new_sub(name: &str) -> Message {
    Message::builder()
        .kind(MessageKind::NewSub)
        .topic(Topic::new(name))
        .build()
}

fn new_message(next_id: &str, topic: &str, body: &[u8]) -> Message {
    Message::builder()
        .id(Message::pending_id(next_id))
        .next_id(next_id)
        .kind(MessageKind::NewMessage)
        .topic(Topic::new(topic))
        .body(body)
        .build()
}

#[tokio::test]
async fn basic_pub_sub() {
    let (addr, broker) = start_broker(None).await;

    let mut subscriber = TcpStream::connect(addr).await.unwrap();
    write_frame(&mut subscriber, &new_topic("t"), WireFormat::Text)
        .await
        .unwrap();
    write_frame(&mut subscriber, &new_sub("t"), WireFormat::Text)
        .await
        .unwrap();
    wait_for(&broker, |b| {
        b.topics.get("t").map(|s| s.len() == 1).unwrap_or(false)
    })
    .await;

    let mut publisher = TcpStream::connect(addr).await.unwrap();
    write_frame(&mut publisher, &new_message("abc", "t", b"hello"), WireFormat::Text)
        .await
        .unwrap();

    let (format, payload) = read_frame(&mut subscriber).await.unwrap();
    let delivered = Message::decode(format, &payload).unwrap();
    assert_eq!(delivered.body, b"hello");
    assert_eq!(delivered.topic.name, "t");

    let stored = broker
        .lock()
        .unwrap()
        .store()
        .get("false-abc")
        .unwrap()
        .unwrap();
    assert_eq!(stored.attempts, 1);
}

#[tokio::test]
async fn ack_over_the_wire_promotes_key() {
    let (addr, broker) = start_broker(None).await;

    let mut subscriber = TcpStream::connect(addr).await.unwrap();
    write_frame(&mut subscriber, &new_sub("t"), WireFormat::Text)
        .await
        .unwrap();
    wait_for(&broker, |b| b.topics.contains_key("t")).await;

    let mut publisher = TcpStream::connect(addr).await.unwrap();
    write_frame(&mut publisher, &new_message("abc", "t", b"hello"), WireFormat::Text)
        .await
        .unwrap();

    let (format, payload) = read_frame(&mut subscriber).await.unwrap();
    let mut ack = Message::decode(format, &payload).unwrap();
    ack.kind = MessageKind::Ack;
    write_frame(&mut subscriber, &ack, WireFormat::Text)
        .await
        .unwrap();

    wait_for(&broker, |b| {
        b.store().get("abc").map(|m| m.is_some()).unwrap_or(false)
    })
    .await;
    let broker = broker.lock().unwrap();
    let promoted = broker.store().get("abc").unwrap().unwrap();
    assert!(promoted.ack);
    assert_eq!(promoted.id, "abc");
    assert!(broker.store().get("false-abc").unwrap().is_none());
}

#[tokio::test]
async fn fanout_respects_subscriber_formats() {
    let (addr, broker) = start_broker(None).await;

    let mut binary_sub = TcpStream::connect(addr).await.unwrap();
    write_frame(&mut binary_sub, &new_sub("t"), WireFormat::Binary)
        .await
        .unwrap();
    let mut text_sub = TcpStream::connect(addr).await.unwrap();
    write_frame(&mut text_sub, &new_sub("t"), WireFormat::Text)
        .await
        .unwrap();
    wait_for(&broker, |b| {
        b.topics.get("t").map(|s| s.len() == 2).unwrap_or(false)
    })
    .await;

    let mut publisher = TcpStream::connect(addr).await.unwrap();
    write_frame(
        &mut publisher,
        &new_message("m", "t", &[1u8, 2, 3, 4, 5]),
        WireFormat::Text,
    )
    .await
    .unwrap();

    let (format_a, payload_a) = read_frame(&mut binary_sub).await.unwrap();
    let (format_b, payload_b) = read_frame(&mut text_sub).await.unwrap();
    assert_eq!(format_a, WireFormat::Binary);
    assert_eq!(format_b, WireFormat::Text);

    let msg_a = Message::decode(format_a, &payload_a).unwrap();
    let msg_b = Message::decode(format_b, &payload_b).unwrap();
    assert_eq!(msg_a, msg_b);
    assert_eq!(msg_a.body, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn auth_success_and_failure() {
    let credentials = Credentials::from_parts("u", "p").unwrap();
    let (addr, _broker) = start_broker(Some(credentials)).await;

    let mut good = TcpStream::connect(addr).await.unwrap();
    let auth = Message::builder()
        .kind(MessageKind::Auth)
        .user("u")
        .password("p")
        .build();
    write_frame(&mut good, &auth, WireFormat::Text).await.unwrap();
    let (format, payload) = read_frame(&mut good).await.unwrap();
    let reply = Message::decode(format, &payload).unwrap();
    assert_eq!(reply.kind, MessageKind::AuthSuccess);

    let mut bad = TcpStream::connect(addr).await.unwrap();
    let auth = Message::builder()
        .kind(MessageKind::Auth)
        .user("u")
        .password("x")
        .build();
    write_frame(&mut bad, &auth, WireFormat::Text).await.unwrap();
    let (format, payload) = read_frame(&mut bad).await.unwrap();
    let reply = Message::decode(format, &payload).unwrap();
    assert_eq!(reply.kind, MessageKind::AuthFailed);

    // the broker hangs up after a failed auth
    assert!(matches!(
        read_frame(&mut bad).await.unwrap_err(),
        FrameError::Closed
    ));
}

#[tokio::test]
async fn non_auth_first_frame_closes_session() {
    let credentials = Credentials::from_parts("u", "p").unwrap();
    let (addr, broker) = start_broker(Some(credentials)).await;

    let mut conn = TcpStream::connect(addr).await.unwrap();
    write_frame(&mut conn, &new_sub("t"), WireFormat::Text)
        .await
        .unwrap();

    assert!(matches!(
        read_frame(&mut conn).await.unwrap_err(),
        FrameError::Closed
    ));
    assert!(!broker.lock().unwrap().topics.contains_key("t"));
}

#[tokio::test]
async fn oversized_frame_keeps_connection_usable() {
    let (addr, broker) = start_broker(None).await;

    let mut conn = TcpStream::connect(addr).await.unwrap();

    // declared length one past the cap, bytes included so the broker can
    // drain them
    let oversized = MAX_FRAME_LEN + 1;
    let mut header = Vec::with_capacity(5);
    header.push(WireFormat::Text.tag());
    header.extend_from_slice(&oversized.to_le_bytes());
    conn.write_all(&header).await.unwrap();
    conn.write_all(&vec![0u8; oversized as usize]).await.unwrap();

    // a valid frame afterwards is still processed
    write_frame(&mut conn, &new_sub("t"), WireFormat::Text)
        .await
        .unwrap();
    wait_for(&broker, |b| {
        b.topics.get("t").map(|s| s.len() == 1).unwrap_or(false)
    })
    .await;
}

#[tokio::test]
async fn disconnect_cleans_up_registry() {
    let (addr, broker) = start_broker(None).await;

    let mut conn = TcpStream::connect(addr).await.unwrap();
    write_frame(&mut conn, &new_sub("t"), WireFormat::Text)
        .await
        .unwrap();
    wait_for(&broker, |b| b.topics.contains_key("t")).await;

    drop(conn);

    wait_for(&broker, |b| !b.topics.contains_key("t")).await;
    assert!(broker.lock().unwrap().sessions.is_empty());
}

#[tokio::test]
async fn malformed_payload_is_dropped_not_fatal() {
    let (addr, broker) = start_broker(None).await;

    let mut conn = TcpStream::connect(addr).await.unwrap();
    let garbage = topiq_wire::frame::encode_frame(WireFormat::Text, b"not json");
    conn.write_all(&garbage).await.unwrap();

    write_frame(&mut conn, &new_sub("t"), WireFormat::Text)
        .await
        .unwrap();
    wait_for(&broker, |b| b.topics.contains_key("t")).await;
}
