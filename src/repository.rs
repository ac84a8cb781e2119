//! Query facade over the blob store, MIME projector and message index.
//!
//! This is the only type transports need: it takes caller-supplied string
//! identifiers, validates them, and returns response DTOs or streams.

use std::io::{self, Write};
use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};
use lru::LruCache;
use tracing::{debug, info, warn};

use crate::config::{self, Config, ListingConfig};
use crate::error::Result;
use crate::index::{builder, MessageIndex};
use crate::model::dto::{DetailDto, MessageListResponse, RefDto};
use crate::model::message::{MessageId, MessageSummary, RawMessage, StoredMessage};
use crate::model::section::SectionContent;
use crate::parser::mime::MimeProjector;
use crate::store::blob::MAX_SEQ;
use crate::store::{BlobStore, FsBlobStore};

/// Stored messages, listed newest first.
///
/// Safe to share between threads. Saves and deletes are serialized; reads
/// run concurrently with each other and with writes.
pub struct MessageRepository<B: BlobStore = FsBlobStore> {
    blobs: B,
    projector: MimeProjector,
    index: MessageIndex,
    listing: ListingConfig,
    /// Subjects by id. Messages never change, so entries only leave on delete.
    summaries: Mutex<LruCache<MessageId, Option<String>>>,
    /// Held across "assign id, commit bytes, update index". Holds the
    /// highest `(timestamp, sequence)` handed out so far, so a deleted
    /// message's id is never assigned again.
    writes: Mutex<Option<(DateTime<Utc>, u32)>>,
}

impl MessageRepository<FsBlobStore> {
    /// Open the message directory named by `config`, rebuilding the index.
    pub fn open(config: &Config) -> Result<Self> {
        let dir = config::message_dir(config);
        let blobs = FsBlobStore::open(&dir, config.performance.max_message_size)?;
        Self::with_store(blobs, config)
    }
}

impl<B: BlobStore> MessageRepository<B> {
    /// Wrap an existing blob store, indexing whatever it already holds.
    pub fn with_store(blobs: B, config: &Config) -> Result<Self> {
        let index = MessageIndex::new();
        let rebuilt = builder::rebuild_into(&blobs, &index)?;
        let capacity =
            NonZeroUsize::new(config.performance.summary_cache_size).unwrap_or(NonZeroUsize::MIN);

        Ok(Self {
            blobs,
            projector: MimeProjector::new(&config.performance),
            index,
            listing: config.listing.clone(),
            summaries: Mutex::new(LruCache::new(capacity)),
            writes: Mutex::new(rebuilt.last_assigned),
        })
    }

    pub fn blobs(&self) -> &B {
        &self.blobs
    }

    /// Number of indexed messages.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Store whatever `writer` produces as a new message.
    ///
    /// The message is listed only once its bytes are durable. If `writer`
    /// fails, nothing is stored.
    pub fn save<F>(&self, mut writer: F) -> Result<StoredMessage>
    where
        F: FnMut(&mut dyn Write) -> io::Result<()>,
    {
        let mut last = self.writes.lock().unwrap_or_else(PoisonError::into_inner);

        let now = Utc::now();
        let now = DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now);
        let (created_at, first_seq) = match *last {
            Some((previous, seq)) if previous >= now => {
                if seq + 1 < MAX_SEQ {
                    (previous, seq + 1)
                } else {
                    (previous + TimeDelta::milliseconds(1), 0)
                }
            }
            _ => (now, 0),
        };

        let stored = self.blobs.save(created_at, first_seq, &mut writer)?;
        self.index.record_insertion(stored.clone());
        *last = Some((created_at, stored.id.sequence().unwrap_or(first_seq)));

        info!(id = %stored.id, size = stored.size, "Message saved");
        Ok(stored)
    }

    /// One page of message summaries, newest first.
    ///
    /// `limit = 0` selects the configured default page size. The total is
    /// the size of the whole collection at the time of the call.
    pub fn list(&self, start: usize, limit: usize) -> Result<MessageListResponse> {
        let limit = self.listing.clamp_limit(limit);
        let page = self.index.page(start, limit);
        debug!(start, limit, total = page.total, "Listing messages");

        let mut messages = Vec::with_capacity(page.messages.len());
        for stored in page.messages {
            match self.summary(stored) {
                Ok(summary) => messages.push(RefDto::from(summary)),
                Err(e) if e.is_not_found() => {
                    debug!(error = %e, "Message vanished while listing");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(MessageListResponse {
            total_message_count: page.total,
            messages,
        })
    }

    /// Full detail of one message.
    pub fn load_detail(&self, id: &str) -> Result<DetailDto> {
        let id = MessageId::parse(id)?;
        let stored = self.stored(&id)?;
        let parsed = self.projector.parse_detail(&id, self.blobs.open(&id)?)?;
        Ok(DetailDto::new(&stored, parsed))
    }

    /// Decoded payload of the section at `index` (depth-first, zero-based).
    pub fn open_section(&self, id: &str, index: usize) -> Result<SectionContent> {
        let id = MessageId::parse(id)?;
        let reader = self.blobs.open(&id)?;
        self.projector.section_at(&id, reader, index)
    }

    /// Decoded payload of the section carrying `content_id`.
    pub fn open_section_by_content_id(&self, id: &str, content_id: &str) -> Result<SectionContent> {
        let id = MessageId::parse(id)?;
        let reader = self.blobs.open(&id)?;
        self.projector.section_by_content_id(&id, reader, content_id)
    }

    /// The message exactly as it was saved.
    pub fn open_raw(&self, id: &str) -> Result<RawMessage> {
        let id = MessageId::parse(id)?;
        let stored = self.stored(&id)?;
        let reader = self.blobs.open(&id)?;
        Ok(RawMessage::new(stored, reader))
    }

    /// Remove a message. Returns `false` if there was nothing to remove.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let Ok(id) = MessageId::parse(id) else {
            return Ok(false);
        };
        let _guard = self.writes.lock().unwrap_or_else(PoisonError::into_inner);

        let removed = match self.blobs.delete(&id) {
            Ok(()) => true,
            Err(e) if e.is_not_found() => false,
            Err(e) => return Err(e),
        };
        let indexed = self.index.record_deletion(&id);
        self.forget_summary(&id);

        if removed {
            info!(id = %id, "Message deleted");
        } else {
            debug!(id = %id, indexed, "Delete of absent message");
        }
        Ok(removed)
    }

    /// Remove every stored message. Returns how many were removed.
    pub fn delete_all(&self) -> Result<usize> {
        let _guard = self.writes.lock().unwrap_or_else(PoisonError::into_inner);

        let mut removed = 0;
        for stored in self.blobs.list()? {
            match self.blobs.delete(&stored.id) {
                Ok(()) => removed += 1,
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    warn!(id = %stored.id, error = %e, "Failed to delete message");
                    builder::rebuild_into(&self.blobs, &self.index)?;
                    return Err(e);
                }
            }
        }
        self.index.clear();
        self.summaries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        info!(count = removed, "All messages deleted");
        Ok(removed)
    }

    /// Re-enumerate the blob store, picking up changes made behind our back.
    pub fn refresh(&self) -> Result<usize> {
        let mut last = self.writes.lock().unwrap_or_else(PoisonError::into_inner);
        let rebuilt = builder::rebuild_into(&self.blobs, &self.index)?;
        *last = (*last).max(rebuilt.last_assigned);
        self.summaries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        Ok(rebuilt.count)
    }

    /// Storage metadata, from the index when possible.
    fn stored(&self, id: &MessageId) -> Result<StoredMessage> {
        match self.index.get(id) {
            Some(stored) => Ok(stored),
            None => self.blobs.stat(id),
        }
    }

    fn summary(&self, stored: StoredMessage) -> Result<MessageSummary> {
        let cached = self
            .summaries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&stored.id)
            .cloned();
        if let Some(subject) = cached {
            return Ok(MessageSummary {
                message: stored,
                subject,
            });
        }

        let summary = self
            .projector
            .parse_summary(&stored, self.blobs.open(&stored.id)?)?;
        self.summaries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(stored.id.clone(), summary.subject.clone());
        Ok(summary)
    }

    fn forget_summary(&self, id: &MessageId) {
        self.summaries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop(id);
    }
}
