//! Append-only mutation journal.
//!
//! One JSON array at a single backing-store key; append is read-modify-
//! write. The journal is advisory: it drives rollback and diagnostics but is
//! never consulted on the common read path. A journal that fails to parse is
//! treated as empty rather than blocking mutations.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use strata_common::error::StoreResult;

use crate::backing::BackingStore;
use crate::meta::ItemMeta;

/// A single journal record. `key` is always the fully-qualified marker key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JournalRecord {
    /// A write sequence started; carries the metadata snapshot being written.
    SetBegin {
        key: String,
        ts: u64,
        meta: ItemMeta,
    },
    /// The write sequence committed.
    SetEnd { key: String, ts: u64 },
    /// The write sequence failed and its entries were deleted.
    SetRollback { key: String, ts: u64 },
    RemoveBegin { key: String, ts: u64 },
    RemoveEnd { key: String, ts: u64 },
    /// A removal failed mid-way; partial deletions are not undone.
    RemoveRollback { key: String, ts: u64 },
}

impl JournalRecord {
    /// The fully-qualified key the record refers to.
    pub fn key(&self) -> &str {
        match self {
            JournalRecord::SetBegin { key, .. }
            | JournalRecord::SetEnd { key, .. }
            | JournalRecord::SetRollback { key, .. }
            | JournalRecord::RemoveBegin { key, .. }
            | JournalRecord::RemoveEnd { key, .. }
            | JournalRecord::RemoveRollback { key, .. } => key,
        }
    }

    pub fn ts(&self) -> u64 {
        match self {
            JournalRecord::SetBegin { ts, .. }
            | JournalRecord::SetEnd { ts, .. }
            | JournalRecord::SetRollback { ts, .. }
            | JournalRecord::RemoveBegin { ts, .. }
            | JournalRecord::RemoveEnd { ts, .. }
            | JournalRecord::RemoveRollback { ts, .. } => *ts,
        }
    }
}

/// The namespace journal.
pub struct Journal {
    store: Arc<dyn BackingStore>,
    key: String,
    enabled: bool,
}

impl Journal {
    pub fn new(store: Arc<dyn BackingStore>, key: String, enabled: bool) -> Self {
        Self {
            store,
            key,
            enabled,
        }
    }

    /// Append one record. A no-op when journaling is disabled.
    pub fn append(&self, record: JournalRecord) -> StoreResult<()> {
        if !self.enabled {
            return Ok(());
        }
        let mut records = self.read_all()?;
        records.push(record);
        let text = serde_json::to_string(&records)?;
        self.store.put(&self.key, &text)?;
        Ok(())
    }

    /// All records in append order. Malformed journals read as empty.
    pub fn read_all(&self) -> StoreResult<Vec<JournalRecord>> {
        match self.store.get(&self.key)? {
            None => Ok(Vec::new()),
            Some(text) => match serde_json::from_str(&text) {
                Ok(records) => Ok(records),
                Err(e) => {
                    tracing::warn!("journal unparsable, treating as empty: {}", e);
                    Ok(Vec::new())
                }
            },
        }
    }

    pub fn len(&self) -> StoreResult<usize> {
        Ok(self.read_all()?.len())
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    pub fn clear(&self) -> StoreResult<()> {
        self.store.delete(&self.key)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backing::MemoryBackingStore;

    fn journal(enabled: bool) -> Journal {
        Journal::new(
            Arc::new(MemoryBackingStore::new()),
            "__lsm__:t:__journal__".into(),
            enabled,
        )
    }

    fn begin(key: &str, ts: u64) -> JournalRecord {
        JournalRecord::SetBegin {
            key: key.to_string(),
            ts,
            meta: ItemMeta {
                created_at: ts,
                updated_at: ts,
                ttl_ms: None,
                expires_at: None,
                compressed: false,
                encrypted: false,
                chunks: 1,
                size: 4,
                lru: ts,
                lfu: 0,
                index_keys: vec![],
                schema_version: 1,
            },
        }
    }

    #[test]
    fn test_append_preserves_order() {
        let j = journal(true);
        j.append(begin("__lsm__:t:a", 1)).unwrap();
        j.append(JournalRecord::SetEnd {
            key: "__lsm__:t:a".into(),
            ts: 2,
        })
        .unwrap();
        let records = j.read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert!(matches!(records[0], JournalRecord::SetBegin { .. }));
        assert!(matches!(records[1], JournalRecord::SetEnd { .. }));
        assert_eq!(records[1].key(), "__lsm__:t:a");
    }

    #[test]
    fn test_disabled_journal_writes_nothing() {
        let j = journal(false);
        j.append(begin("__lsm__:t:a", 1)).unwrap();
        assert!(j.is_empty().unwrap());
    }

    #[test]
    fn test_clear() {
        let j = journal(true);
        j.append(begin("__lsm__:t:a", 1)).unwrap();
        j.clear().unwrap();
        assert!(j.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_malformed_journal_reads_empty() {
        let store = Arc::new(MemoryBackingStore::new());
        store.put("__lsm__:t:__journal__", "[{broken").unwrap();
        let j = Journal::new(store, "__lsm__:t:__journal__".into(), true);
        assert!(j.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_record_kinds_serialize_as_wire_names() {
        let text = serde_json::to_string(&JournalRecord::SetRollback {
            key: "k".into(),
            ts: 9,
        })
        .unwrap();
        assert!(text.contains("\"SET_ROLLBACK\""));
        let text = serde_json::to_string(&JournalRecord::RemoveBegin {
            key: "k".into(),
            ts: 9,
        })
        .unwrap();
        assert!(text.contains("\"REMOVE_BEGIN\""));
    }
}
