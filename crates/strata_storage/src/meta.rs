//! Per-item metadata and the registry that persists it.
//!
//! For every marker there must exist one metadata record and exactly
//! `chunks` chunk entries; the `compressed`/`encrypted` flags are set at
//! write time and determine the exact reverse pipeline on read. Orphaned
//! metadata (no marker) is corruption and is reclaimed by vacuum.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use strata_common::error::{StoreError, StoreResult};

use crate::backing::BackingStore;
use crate::keys::KeyLayout;

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A reference from an item to one of its secondary-index entries.
///
/// Stored structured rather than as a `"name:value"` string so field values
/// containing `:` round-trip on removal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRef {
    pub index: String,
    pub value: String,
}

/// The metadata record stored beside every item.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemMeta {
    /// Creation timestamp (unix millis); preserved across overwrites.
    pub created_at: u64,
    /// Last write timestamp (unix millis).
    pub updated_at: u64,
    /// Requested time-to-live, when any.
    #[serde(default, rename = "ttl")]
    pub ttl_ms: Option<u64>,
    /// Absolute expiry deadline, when any.
    #[serde(default)]
    pub expires_at: Option<u64>,
    /// Payload went through the compression stage.
    pub compressed: bool,
    /// Payload went through the encryption stage.
    pub encrypted: bool,
    /// Number of chunk entries.
    pub chunks: usize,
    /// Byte size of the encoded payload before chunking.
    pub size: usize,
    /// Last-access timestamp (unix millis), updated on every read.
    pub lru: u64,
    /// Access counter, incremented on every read.
    pub lfu: u64,
    /// Secondary-index entries this item participates in.
    #[serde(default)]
    pub index_keys: Vec<IndexRef>,
    pub schema_version: u32,
}

impl ItemMeta {
    /// Whether the item's deadline has passed at `now`.
    pub fn is_expired(&self, now: u64) -> bool {
        matches!(self.expires_at, Some(deadline) if now >= deadline)
    }
}

/// The marker entry whose presence defines "item exists".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Marker {
    pub chunks: usize,
    pub meta_ref: String,
}

/// Reads and writes metadata records at their deterministic keys.
pub struct MetaRegistry {
    store: Arc<dyn BackingStore>,
    layout: KeyLayout,
}

impl MetaRegistry {
    pub fn new(store: Arc<dyn BackingStore>, layout: KeyLayout) -> Self {
        Self { store, layout }
    }

    /// Read an item's metadata. `Ok(None)` when absent; `CorruptData` when
    /// present but unparsable.
    pub fn read(&self, user_key: &str) -> StoreResult<Option<ItemMeta>> {
        let raw = self.store.get(&self.layout.meta(user_key))?;
        match raw {
            None => Ok(None),
            Some(text) => serde_json::from_str(&text)
                .map(Some)
                .map_err(|e| StoreError::CorruptData(format!("metadata for {}: {}", user_key, e))),
        }
    }

    pub fn write(&self, user_key: &str, meta: &ItemMeta) -> StoreResult<()> {
        let text = serde_json::to_string(meta)?;
        self.store.put(&self.layout.meta(user_key), &text)?;
        Ok(())
    }

    pub fn delete(&self, user_key: &str) -> StoreResult<()> {
        self.store.delete(&self.layout.meta(user_key))?;
        Ok(())
    }

    /// Update LRU to `now` and bump the LFU counter. Called at the end of
    /// every successful read; failures here never fail the read.
    pub fn touch(&self, user_key: &str, now: u64) -> StoreResult<()> {
        if let Some(mut meta) = self.read(user_key)? {
            meta.lru = now;
            meta.lfu = meta.lfu.saturating_add(1);
            self.write(user_key, &meta)?;
        }
        Ok(())
    }
}
