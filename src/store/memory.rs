//! In-memory [`BlobStore`], for tests and throwaway capture sessions.

use std::collections::BTreeMap;
use std::io::{self, Cursor, Read};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};

use super::blob::{BlobStore, MessageWriter, MAX_SEQ};
use crate::error::{MailError, Result};
use crate::model::message::{MessageId, StoredMessage};

/// Blob store keeping every message in a shared map.
///
/// Readers get their own copy of the bytes, so a delete never disturbs a
/// stream that is already open.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<RwLock<BTreeMap<MessageId, (DateTime<Utc>, Arc<Vec<u8>>)>>>,
    max_message_size: Option<u64>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse messages larger than `limit` bytes.
    pub fn with_limit(limit: u64) -> Self {
        Self {
            max_message_size: Some(limit),
            ..Self::default()
        }
    }

    fn stored(id: &MessageId, created_at: DateTime<Utc>, bytes: &[u8]) -> StoredMessage {
        StoredMessage {
            id: id.clone(),
            created_at,
            size: bytes.len() as u64,
        }
    }
}

impl BlobStore for MemoryBlobStore {
    fn save(
        &self,
        created_at: DateTime<Utc>,
        first_seq: u32,
        writer: &mut MessageWriter<'_>,
    ) -> Result<StoredMessage> {
        let mut buf = Vec::new();
        writer(&mut buf)?;
        if let Some(limit) = self.max_message_size {
            if buf.len() as u64 > limit {
                return Err(MailError::MessageTooLarge {
                    size: buf.len() as u64,
                    limit,
                });
            }
        }

        let mut blobs = self.blobs.write().unwrap_or_else(PoisonError::into_inner);
        let id = (first_seq..MAX_SEQ)
            .map(|seq| MessageId::generate(created_at, seq))
            .find(|id| !blobs.contains_key(id))
            .ok_or_else(|| {
                MailError::io(
                    "<memory>",
                    io::Error::new(
                        io::ErrorKind::AlreadyExists,
                        "no free message identifier for this millisecond",
                    ),
                )
            })?;
        let stored = Self::stored(&id, created_at, &buf);
        blobs.insert(id, (created_at, Arc::new(buf)));
        Ok(stored)
    }

    fn open(&self, id: &MessageId) -> Result<Box<dyn Read + Send>> {
        let blobs = self.blobs.read().unwrap_or_else(PoisonError::into_inner);
        let (_, bytes) = blobs
            .get(id)
            .ok_or_else(|| MailError::MessageNotFound(id.to_string()))?;
        Ok(Box::new(Cursor::new(bytes.to_vec())))
    }

    fn stat(&self, id: &MessageId) -> Result<StoredMessage> {
        let blobs = self.blobs.read().unwrap_or_else(PoisonError::into_inner);
        let (created_at, bytes) = blobs
            .get(id)
            .ok_or_else(|| MailError::MessageNotFound(id.to_string()))?;
        Ok(Self::stored(id, *created_at, bytes))
    }

    fn delete(&self, id: &MessageId) -> Result<()> {
        let mut blobs = self.blobs.write().unwrap_or_else(PoisonError::into_inner);
        blobs
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| MailError::MessageNotFound(id.to_string()))
    }

    fn list(&self) -> Result<Vec<StoredMessage>> {
        let blobs = self.blobs.read().unwrap_or_else(PoisonError::into_inner);
        Ok(blobs
            .iter()
            .map(|(id, (created_at, bytes))| Self::stored(id, *created_at, bytes))
            .collect())
    }
}
