use topiq_wire::{Message, MessageKind, Topic, WireFormat, PENDING_PREFIX};
use uuid::Uuid;

use crate::{MessageStore, MAX_DELIVERY_ATTEMPTS};

fn open_store(format: WireFormat) -> MessageStore {
    MessageStore::open("unused", true, format).unwrap()
}

fn pending_message(next_id: &str) -> Message {
    Message::builder()
        .id(Message::pending_id(next_id))
        .next_id(next_id)
        .kind(MessageKind::NewMessage)
        .topic(Topic::new("t"))
        .body(&b"payload"[..])
        .build()
}

#[test]
fn save_stores_pending_copy_with_one_attempt() {
    let store = open_store(WireFormat::Text);
    let msg = pending_message("m1");

    store.save(&msg).unwrap();

    let stored = store.get(&msg.id).unwrap().unwrap();
    assert_eq!(stored.attempts, 1);
    assert!(!stored.ack);
    assert!(stored.id.starts_with(PENDING_PREFIX));
    // the caller's copy is untouched
    assert_eq!(msg.attempts, 0);
}

#[test]
fn save_rejects_non_pending_keys() {
    let store = open_store(WireFormat::Text);
    let mut msg = pending_message("m2");
    msg.id = msg.next_id.clone();

    assert!(store.save(&msg).is_err());
    assert!(store.get(&msg.id).unwrap().is_none());
}

#[test]
fn promote_ack_moves_key_and_sets_ack() {
    let store = open_store(WireFormat::Text);
    let msg = pending_message("m3");
    store.save(&msg).unwrap();

    store.promote_ack(&msg).unwrap();

    assert!(store.get(&msg.id).unwrap().is_none());
    let acked = store.get("m3").unwrap().unwrap();
    assert!(acked.ack);
    assert_eq!(acked.id, "m3");
    assert_eq!(acked.next_id, "m3");
}

#[test]
fn promote_ack_without_pending_key_still_writes() {
    let store = open_store(WireFormat::Binary);
    let msg = pending_message("m4");
    // never saved: the delete is a no-op, the write still happens
    store.promote_ack(&msg).unwrap();

    let acked = store.get("m4").unwrap().unwrap();
    assert!(acked.ack);
    assert!(store.get(&Message::pending_id("m4")).unwrap().is_none());
}

#[test]
fn promote_ack_is_idempotent() {
    let store = open_store(WireFormat::Text);
    let msg = pending_message("m5");
    store.save(&msg).unwrap();

    store.promote_ack(&msg).unwrap();
    store.promote_ack(&msg).unwrap();

    assert!(store.get("m5").unwrap().unwrap().ack);
}

#[test]
fn scan_on_empty_store_returns_nothing() {
    let store = open_store(WireFormat::Text);
    assert!(store.scan_undelivered().unwrap().is_empty());
}

#[test]
fn scan_returns_copies_with_bumped_attempts() {
    let store = open_store(WireFormat::Text);
    let msg = pending_message("m6");
    store.save(&msg).unwrap();

    let pending = store.scan_undelivered().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].attempts, 2);

    // the stored value was not updated by the scan
    assert_eq!(store.get(&msg.id).unwrap().unwrap().attempts, 1);
    let again = store.scan_undelivered().unwrap();
    assert_eq!(again[0].attempts, 2);
}

#[test]
fn scan_skips_exhausted_messages() {
    let store = open_store(WireFormat::Text);

    let fresh = pending_message("fresh");
    store.save(&fresh).unwrap();

    let mut stuck = pending_message("stuck");
    stuck.attempts = MAX_DELIVERY_ATTEMPTS; // stored as MAX + 1
    store.save(&stuck).unwrap();

    let pending = store.scan_undelivered().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].next_id, "fresh");
}

#[test]
fn scan_ignores_acknowledged_keyspace() {
    let store = open_store(WireFormat::Text);
    let msg = pending_message("m7");
    store.save(&msg).unwrap();
    store.promote_ack(&msg).unwrap();

    assert!(store.scan_undelivered().unwrap().is_empty());
}

#[test]
fn stored_attempts_never_decrease() {
    let store = open_store(WireFormat::Binary);
    let msg = pending_message("m8");
    store.save(&msg).unwrap();

    // a failed retry persists an incremented copy over the same key
    let mut retry = store.get(&msg.id).unwrap().unwrap();
    retry.increment_attempts();
    store.save(&retry).unwrap();

    assert_eq!(store.get(&msg.id).unwrap().unwrap().attempts, 3);
}

#[test]
fn on_disk_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let next_id = Uuid::new_v4().to_string();
    let msg = pending_message(&next_id);

    {
        let store = MessageStore::open(dir.path(), false, WireFormat::Text).unwrap();
        store.save(&msg).unwrap();
    }

    let store = MessageStore::open(dir.path(), false, WireFormat::Text).unwrap();
    let pending = store.scan_undelivered().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].next_id, next_id);
}
