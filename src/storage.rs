//! Inbox: persistent record of the messages delivered on tuned channels.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::constants::message::SIGNATURE_LEN;
use crate::error::StorageError;
use crate::message::{Message, Signature};

/// What the inbox keeps of a delivered message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboxRecord {
    pub timestamp: u64,
    pub channel: String,
    pub payload: Vec<u8>,
}

impl From<&Message> for InboxRecord {
    fn from(message: &Message) -> Self {
        Self {
            timestamp: message.timestamp(),
            channel: message.channel().to_string(),
            payload: message.payload().to_vec(),
        }
    }
}

/// Sink for messages delivered on tuned channels
#[async_trait::async_trait]
pub trait Inbox: Send + Sync {
    async fn add(&self, signature: Signature, record: InboxRecord) -> Result<(), StorageError>;
    async fn remove(&self, signature: &Signature) -> Result<Option<InboxRecord>, StorageError>;
    async fn get(&self, signature: &Signature) -> Option<InboxRecord>;
    async fn list(&self) -> Vec<(Signature, InboxRecord)>;
}

#[derive(Default)]
pub struct MemoryInbox {
    records: Arc<RwLock<HashMap<Signature, InboxRecord>>>,
}

impl MemoryInbox {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Inbox for MemoryInbox {
    async fn add(&self, signature: Signature, record: InboxRecord) -> Result<(), StorageError> {
        self.records.write().await.insert(signature, record);
        Ok(())
    }

    async fn remove(&self, signature: &Signature) -> Result<Option<InboxRecord>, StorageError> {
        Ok(self.records.write().await.remove(signature))
    }

    async fn get(&self, signature: &Signature) -> Option<InboxRecord> {
        self.records.read().await.get(signature).cloned()
    }

    async fn list(&self) -> Vec<(Signature, InboxRecord)> {
        let mut records: Vec<_> = self
            .records
            .read()
            .await
            .iter()
            .map(|(sig, record)| (*sig, record.clone()))
            .collect();
        records.sort_by_key(|(_, record)| record.timestamp);
        records
    }
}

/// Sled-backed inbox: raw signature bytes as keys, bincode records as values
pub struct SledInbox {
    db: sled::Db,
}

impl SledInbox {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let db = sled::open(path).map_err(|source| StorageError::DatabaseOpen {
            name: path.display().to_string(),
            source,
        })?;
        Ok(Self { db })
    }

    fn decode_entry(key: &[u8], value: &[u8]) -> Option<(Signature, InboxRecord)> {
        let bytes: [u8; SIGNATURE_LEN] = key.try_into().ok()?;
        let record = bincode::deserialize(value).ok()?;
        Some((Signature::from_bytes(bytes), record))
    }
}

#[async_trait::async_trait]
impl Inbox for SledInbox {
    async fn add(&self, signature: Signature, record: InboxRecord) -> Result<(), StorageError> {
        let value = bincode::serialize(&record)?;
        self.db.insert(signature.as_bytes(), value)?;
        Ok(())
    }

    async fn remove(&self, signature: &Signature) -> Result<Option<InboxRecord>, StorageError> {
        match self.db.remove(signature.as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    async fn get(&self, signature: &Signature) -> Option<InboxRecord> {
        let value = self.db.get(signature.as_bytes()).ok()??;
        bincode::deserialize(&value).ok()
    }

    async fn list(&self) -> Vec<(Signature, InboxRecord)> {
        let mut records: Vec<_> = self
            .db
            .iter()
            .filter_map(|item| {
                let (key, value) = item.ok()?;
                Self::decode_entry(&key, &value)
            })
            .collect();
        records.sort_by_key(|(_, record)| record.timestamp);
        records
    }
}
