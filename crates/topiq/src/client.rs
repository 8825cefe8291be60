//! Example client
//!
//! Walks the whole protocol against a running broker: optional `AUTH`
//! exchange, topic creation, subscription, one publish, one delivery and
//! its `ACK`. Ids follow the publisher convention: a fresh uuid as
//! `next_id` and the `false-`-prefixed variant as the storage key.

use std::error::Error;

use tokio::net::TcpStream;
use topiq_wire::frame::{read_frame, write_frame};
use topiq_wire::{Message, MessageKind, Topic, WireFormat};
use tracing::info;
use uuid::Uuid;

pub async fn run(
    addr: &str,
    topic: &str,
    user: &str,
    password: &str,
    format: WireFormat,
) -> Result<(), Box<dyn Error>> {
    let mut conn = TcpStream::connect(addr).await?;
    info!(addr = %addr, format = %format, "connected");

    if !user.is_empty() || !password.is_empty() {
        let auth = Message::builder()
            .id(Uuid::new_v4().to_string())
            .kind(MessageKind::Auth)
            .user(user)
            .password(password)
            .build();
        write_frame(&mut conn, &auth, WireFormat::Text).await?;

        let (reply_format, payload) = read_frame(&mut conn).await?;
        let reply = Message::decode(reply_format, &payload)?;
        if reply.kind != MessageKind::AuthSuccess {
            return Err("authentication failed".into());
        }
        info!("authenticated");
    }

    let create = Message::builder()
        .id(Uuid::new_v4().to_string())
        .kind(MessageKind::NewTopic)
        .topic(Topic::new(topic))
        .build();
    write_frame(&mut conn, &create, format).await?;

    let sub_id = Uuid::new_v4().to_string();
    let subscribe = Message::builder()
        .id(sub_id.clone())
        .next_id(sub_id)
        .kind(MessageKind::NewSub)
        .topic(Topic::new(topic))
        .build();
    write_frame(&mut conn, &subscribe, format).await?;

    // publish one message to ourselves
    let next_id = Uuid::new_v4().to_string();
    let publish = Message::builder()
        .id(Message::pending_id(&next_id))
        .next_id(next_id)
        .kind(MessageKind::NewMessage)
        .topic(Topic::new(topic))
        .body(&br#"{"greeting":"hello from topiq"}"#[..])
        .build();
    write_frame(&mut conn, &publish, format).await?;
    info!(topic = %topic, "published");

    let (delivery_format, payload) = read_frame(&mut conn).await?;
    let delivered = Message::decode(delivery_format, &payload)?;
    info!(body = %delivered.body_string, format = %delivery_format, "received");

    let ack = Message::builder()
        .id(delivered.id.clone())
        .next_id(delivered.next_id.clone())
        .kind(MessageKind::Ack)
        .topic(delivered.topic.clone())
        .body(delivered.body.clone())
        .timestamp(delivered.timestamp)
        .attempts(delivered.attempts)
        .ack(true)
        .build();
    write_frame(&mut conn, &ack, format).await?;
    info!(id = %delivered.next_id, "acknowledged");

    Ok(())
}
