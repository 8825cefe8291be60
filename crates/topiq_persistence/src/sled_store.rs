//! Message store backed by `sled`
//!
//! Keys are message ids: `false-<uuid>` while a message is pending,
//! `<uuid>` once acknowledged. Values are the message serialized in the
//! single wire format the store was opened with. Ack promotion runs as a
//! sled transaction so the pending key and the acknowledged key never
//! coexist.

use std::path::Path;

use sled::transaction::TransactionError;
use sled::Db;
use topiq_wire::{CodecError, Message, WireFormat, PENDING_PREFIX};
use tracing::warn;

/// Pending messages with more recorded attempts than this are left where
/// they are; the scheduler stops picking them up.
pub const MAX_DELIVERY_ATTEMPTS: u32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Db(#[from] sled::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("invalid key {0:?}, pending messages must use the {PENDING_PREFIX:?} prefix")]
    InvalidKey(String),
}

#[derive(Clone)]
pub struct MessageStore {
    db: Db,
    format: WireFormat,
}

impl MessageStore {
    /// Open an on-disk store at `path`, or an ephemeral one when
    /// `in_memory` is set. Stored values use `format`.
    pub fn open(path: impl AsRef<Path>, in_memory: bool, format: WireFormat) -> Result<Self, StoreError> {
        let db = if in_memory {
            sled::Config::new().temporary(true).open()?
        } else {
            sled::open(path)?
        };
        Ok(Self { db, format })
    }

    /// First save of a published message. The stored copy gets one more
    /// attempt than the caller's, so a fresh publish lands with
    /// `attempts = 1`.
    pub fn save(&self, msg: &Message) -> Result<(), StoreError> {
        if !msg.is_pending() {
            return Err(StoreError::InvalidKey(msg.id.clone()));
        }

        let mut stored = msg.clone();
        stored.increment_attempts();
        let value = stored.encode(self.format)?;
        self.db.insert(stored.id.as_bytes(), value)?;
        Ok(())
    }

    /// Acknowledge a message: delete the pending key and re-insert the
    /// promoted copy under `next_id`, in one transaction. A pending key
    /// that is already gone does not fail the ack; a failed insert aborts
    /// the transaction, leaving the pending key in place.
    pub fn promote_ack(&self, msg: &Message) -> Result<(), StoreError> {
        let mut promoted = msg.clone();
        promoted.promote_to_ack();
        let value = promoted.encode(self.format)?;

        let old_key = msg.id.as_bytes().to_vec();
        let new_key = promoted.id.as_bytes().to_vec();

        self.db
            .transaction(move |tx| {
                tx.remove(old_key.as_slice())?;
                tx.insert(new_key.as_slice(), value.clone())?;
                Ok(())
            })
            .map_err(|e| match e {
                TransactionError::Storage(e) => StoreError::Db(e),
                TransactionError::Abort(()) => unreachable!("transaction never aborts"),
            })
    }

    /// All pending messages still worth retrying. The returned copies
    /// carry `attempts + 1`; the stored values are untouched — they only
    /// change through [`MessageStore::save`] when a retry itself fails.
    pub fn scan_undelivered(&self) -> Result<Vec<Message>, StoreError> {
        let mut pending = Vec::new();

        for entry in self.db.scan_prefix(PENDING_PREFIX.as_bytes()) {
            let (key, value) = entry?;
            let mut msg = match Message::decode(self.format, &value) {
                Ok(msg) => msg,
                Err(e) => {
                    warn!(key = %String::from_utf8_lossy(&key), error = %e, "skipping undecodable entry");
                    continue;
                }
            };

            if msg.attempts <= MAX_DELIVERY_ATTEMPTS {
                msg.increment_attempts();
                pending.push(msg);
            }
        }

        Ok(pending)
    }

    /// Fetch one message by storage key.
    pub fn get(&self, key: &str) -> Result<Option<Message>, StoreError> {
        match self.db.get(key.as_bytes())? {
            Some(value) => Ok(Some(Message::decode(self.format, &value)?)),
            None => Ok(None),
        }
    }
}

impl std::fmt::Debug for MessageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStore")
            .field("format", &self.format)
            .finish()
    }
}
