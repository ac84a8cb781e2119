//! In-memory ordering of stored messages.
//!
//! The index keeps every known message keyed by `(created_at, ordinal)`,
//! where the ordinal is a counter bumped on each insertion. Iterating the
//! map backwards yields the listing order: newest first, and among equal
//! timestamps the later insertion first.

pub mod builder;

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};

use crate::model::message::{MessageId, StoredMessage};

type OrderKey = (DateTime<Utc>, u64);

/// One page of the index, taken under a single read lock.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexPage {
    pub messages: Vec<StoredMessage>,
    /// Number of indexed messages when the page was taken.
    pub total: usize,
}

#[derive(Debug, Default)]
struct IndexState {
    ordered: BTreeMap<OrderKey, StoredMessage>,
    keys: HashMap<MessageId, OrderKey>,
    next_ordinal: u64,
}

impl IndexState {
    fn insert(&mut self, message: StoredMessage) {
        if let Some(old) = self.keys.remove(&message.id) {
            self.ordered.remove(&old);
        }
        let key = (message.created_at, self.next_ordinal);
        self.next_ordinal += 1;
        self.keys.insert(message.id.clone(), key);
        self.ordered.insert(key, message);
    }

    fn remove(&mut self, id: &MessageId) -> bool {
        match self.keys.remove(id) {
            Some(key) => {
                self.ordered.remove(&key);
                true
            }
            None => false,
        }
    }
}

/// Concurrent, reverse-chronological index of stored messages.
///
/// Mutations take the write lock for the whole update, so a page never
/// observes a half-applied insertion or deletion.
#[derive(Debug, Default)]
pub struct MessageIndex {
    state: RwLock<IndexState>,
}

impl MessageIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index by inserting `messages` in the given order.
    pub fn from_messages(messages: impl IntoIterator<Item = StoredMessage>) -> Self {
        let index = Self::new();
        index.replace_all(messages);
        index
    }

    /// Make a freshly saved message visible.
    ///
    /// Re-recording a known id moves it to the position of a new insertion.
    pub fn record_insertion(&self, message: StoredMessage) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(message);
    }

    /// Forget a message. Returns `false` if it was not indexed.
    pub fn record_deletion(&self, id: &MessageId) -> bool {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    /// Up to `limit` messages starting `start` entries from the newest.
    pub fn page(&self, start: usize, limit: usize) -> IndexPage {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        IndexPage {
            messages: state
                .ordered
                .values()
                .rev()
                .skip(start)
                .take(limit)
                .cloned()
                .collect(),
            total: state.ordered.len(),
        }
    }

    pub fn get(&self, id: &MessageId) -> Option<StoredMessage> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let key = state.keys.get(id)?;
        state.ordered.get(key).cloned()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys
            .contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .ordered
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Swap the whole content for `messages`, inserted in the given order.
    pub fn replace_all(&self, messages: impl IntoIterator<Item = StoredMessage>) {
        let mut fresh = IndexState::default();
        for message in messages {
            fresh.insert(message);
        }
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = fresh;
    }

    pub fn clear(&self) {
        self.replace_all(std::iter::empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn at(second: u32, seq: u32) -> StoredMessage {
        let created_at = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, second).unwrap();
        StoredMessage {
            id: MessageId::generate(created_at, seq),
            created_at,
            size: 10,
        }
    }

    fn ids(page: &IndexPage) -> Vec<&str> {
        page.messages.iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn test_page_newest_first() {
        let index = MessageIndex::new();
        index.record_insertion(at(1, 0));
        index.record_insertion(at(3, 0));
        index.record_insertion(at(2, 0));

        let page = index.page(0, 10);
        assert_eq!(page.total, 3);
        assert_eq!(
            ids(&page),
            vec![
                "20240601100003000-0000.eml",
                "20240601100002000-0000.eml",
                "20240601100001000-0000.eml",
            ]
        );
    }

    #[test]
    fn test_equal_timestamps_later_insertion_first() {
        let index = MessageIndex::new();
        index.record_insertion(at(5, 0));
        index.record_insertion(at(5, 1));
        index.record_insertion(at(5, 2));

        let page = index.page(0, 10);
        assert_eq!(
            ids(&page),
            vec![
                "20240601100005000-0002.eml",
                "20240601100005000-0001.eml",
                "20240601100005000-0000.eml",
            ]
        );
    }

    #[test]
    fn test_page_bounds() {
        let index = MessageIndex::from_messages((0..10).map(|s| at(s, 0)));
        let page = index.page(3, 2);
        assert_eq!(page.total, 10);
        assert_eq!(
            ids(&page),
            vec!["20240601100006000-0000.eml", "20240601100005000-0000.eml"]
        );

        let past_end = index.page(10, 5);
        assert!(past_end.messages.is_empty());
        assert_eq!(past_end.total, 10);

        let tail = index.page(8, 50);
        assert_eq!(tail.messages.len(), 2);
        assert!(index.page(0, 0).messages.is_empty());
    }

    #[test]
    fn test_deletion() {
        let index = MessageIndex::from_messages([at(1, 0), at(2, 0)]);
        let gone = at(1, 0).id;
        assert!(index.record_deletion(&gone));
        assert!(!index.record_deletion(&gone));
        assert!(!index.contains(&gone));
        assert_eq!(index.len(), 1);
        assert_eq!(index.page(0, 10).total, 1);
    }

    #[test]
    fn test_reinsertion_does_not_duplicate() {
        let index = MessageIndex::new();
        index.record_insertion(at(1, 0));
        index.record_insertion(at(1, 0));
        assert_eq!(index.len(), 1);
        assert_eq!(index.get(&at(1, 0).id), Some(at(1, 0)));
    }

    #[test]
    fn test_clear() {
        let index = MessageIndex::from_messages([at(1, 0), at(2, 0)]);
        index.clear();
        assert!(index.is_empty());
        assert_eq!(index.page(0, 10), IndexPage::default());
    }

    #[test]
    fn test_pages_consistent_under_concurrent_inserts() {
        let index = Arc::new(MessageIndex::new());
        let writer = {
            let index = Arc::clone(&index);
            std::thread::spawn(move || {
                for seq in 0..500 {
                    index.record_insertion(at(0, seq));
                }
            })
        };

        for _ in 0..200 {
            let page = index.page(0, usize::MAX);
            assert_eq!(page.messages.len(), page.total);
            assert!(page.messages.windows(2).all(|w| w[0].id > w[1].id));
        }
        writer.join().unwrap();
        assert_eq!(index.len(), 500);
    }
}
