//! Index construction from a blob store enumeration.

use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::MessageIndex;
use crate::error::Result;
use crate::model::message::StoredMessage;
use crate::store::BlobStore;

/// Outcome of an index rebuild.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildSummary {
    /// Number of indexed messages.
    pub count: usize,
    /// Highest `(timestamp, sequence)` carried by a generated id.
    pub last_assigned: Option<(DateTime<Utc>, u32)>,
}

/// Build the index for everything currently in `blobs`.
///
/// Messages are replayed oldest first, equal timestamps ordered by id, so
/// the result matches what live insertion would have produced.
pub fn build_index(blobs: &dyn BlobStore) -> Result<MessageIndex> {
    let index = MessageIndex::new();
    rebuild_into(blobs, &index)?;
    Ok(index)
}

/// Replace the content of `index` with a fresh enumeration of `blobs`.
pub fn rebuild_into(blobs: &dyn BlobStore, index: &MessageIndex) -> Result<RebuildSummary> {
    let start = Instant::now();
    let messages = replay_order(blobs.list()?);
    let summary = RebuildSummary {
        count: messages.len(),
        last_assigned: last_assigned(&messages),
    };
    index.replace_all(messages);

    if summary.count > 0 {
        info!(
            count = summary.count,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Index built"
        );
    } else {
        debug!("Index built from an empty store");
    }
    Ok(summary)
}

/// Highest `(timestamp, sequence)` among generated ids in `messages`.
pub fn last_assigned(messages: &[StoredMessage]) -> Option<(DateTime<Utc>, u32)> {
    messages
        .iter()
        .filter_map(|m| Some((m.id.timestamp()?, m.id.sequence()?)))
        .max()
}

/// Sort an enumeration into insertion order.
pub fn replay_order(mut messages: Vec<StoredMessage>) -> Vec<StoredMessage> {
    messages.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::message::MessageId;
    use crate::store::MemoryBlobStore;
    use chrono::{TimeZone, Utc};
    use std::io::Write;

    #[test]
    fn test_rebuild_matches_live_order() {
        let blobs = MemoryBlobStore::new();
        let live = MessageIndex::new();
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        for offset in [0, 0, 0, 5, 5, 9] {
            let created = t + chrono::Duration::milliseconds(offset);
            let stored = blobs
                .save(created, 0, &mut |w: &mut dyn Write| w.write_all(b"x"))
                .unwrap();
            live.record_insertion(stored);
        }

        let rebuilt = build_index(&blobs).unwrap();
        assert_eq!(rebuilt.page(0, 100), live.page(0, 100));
    }

    #[test]
    fn test_rebuild_matches_live_order_after_delete() {
        let blobs = MemoryBlobStore::new();
        let live = MessageIndex::new();
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let save = |seq: u32| {
            let stored = blobs
                .save(t, seq, &mut |w: &mut dyn Write| w.write_all(b"x"))
                .unwrap();
            live.record_insertion(stored.clone());
            stored
        };

        let a = save(0);
        let b = save(1);
        blobs.delete(&a.id).unwrap();
        live.record_deletion(&a.id);
        let c = save(2);
        assert_ne!(c.id, a.id);

        let rebuilt = MessageIndex::new();
        let summary = rebuild_into(&blobs, &rebuilt).unwrap();
        assert_eq!(summary.count, 2);
        assert_eq!(summary.last_assigned, Some((t, 2)));
        assert_eq!(rebuilt.page(0, 10), live.page(0, 10));
        assert_eq!(rebuilt.page(0, 10).messages[1], b);
    }

    #[test]
    fn test_last_assigned_ignores_foreign_names() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let foreign = StoredMessage {
            id: MessageId::parse("zz-hand-made.eml").unwrap(),
            created_at: t + chrono::Duration::days(1),
            size: 1,
        };
        let generated = StoredMessage {
            id: MessageId::generate(t, 3),
            created_at: t,
            size: 1,
        };
        assert_eq!(last_assigned(&[foreign.clone(), generated]), Some((t, 3)));
        assert_eq!(last_assigned(&[foreign]), None);
    }

    #[test]
    fn test_replay_order_breaks_ties_by_id() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let msg = |id: &str| StoredMessage {
            id: MessageId::parse(id).unwrap(),
            created_at: t,
            size: 1,
        };
        let ordered = replay_order(vec![msg("b.eml"), msg("a.eml"), msg("c.eml")]);
        let ids: Vec<_> = ordered.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["a.eml", "b.eml", "c.eml"]);
    }

    #[test]
    fn test_rebuild_into_replaces_content() {
        let blobs = MemoryBlobStore::new();
        let index = MessageIndex::new();
        let stale = StoredMessage {
            id: MessageId::parse("stale.eml").unwrap(),
            created_at: Utc::now(),
            size: 1,
        };
        index.record_insertion(stale.clone());
        assert_eq!(rebuild_into(&blobs, &index).unwrap(), RebuildSummary::default());
        assert!(!index.contains(&stale.id));
    }
}
