//! Uniform adapter over the host's string-keyed storage.
//!
//! The engine never talks to the host store directly; it goes through
//! [`BackingStore`], which performs no interpretation of keys or values.
//! Implementers supply either the host-native store or the in-memory
//! substitute below, which tests and single-process deployments use.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use thiserror::Error;

use strata_common::error::StoreError;

/// Faults a backing provider can raise. Quota rejection is the only kind
/// the engine interprets; anything else is surfaced unchanged.
#[derive(Error, Debug)]
pub enum BackingError {
    #[error("backing store is full")]
    Full,
    #[error("{0}")]
    Provider(String),
}

impl From<BackingError> for StoreError {
    fn from(e: BackingError) -> Self {
        match e {
            BackingError::Full => StoreError::StorageFull,
            BackingError::Provider(msg) => StoreError::Provider(msg),
        }
    }
}

/// Synchronous, string-only storage primitive.
///
/// Shared across arbitrarily many execution contexts with no cross-context
/// atomicity; every consistency property the engine offers is built in spite
/// of that.
pub trait BackingStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, BackingError>;
    /// Fails with [`BackingError::Full`] when the write is rejected for
    /// quota reasons.
    fn put(&self, key: &str, value: &str) -> Result<(), BackingError>;
    fn delete(&self, key: &str) -> Result<(), BackingError>;
    /// The key at `index` in the store's traversal order, or `None` past the
    /// end. Traversal order is provider-defined but stable between
    /// mutations.
    fn key_at(&self, index: usize) -> Result<Option<String>, BackingError>;
    fn len(&self) -> Result<usize, BackingError>;
    fn is_empty(&self) -> Result<bool, BackingError> {
        Ok(self.len()? == 0)
    }
    fn clear(&self) -> Result<(), BackingError>;
}

/// Snapshot every key starting with `prefix`, in traversal order.
///
/// Iterates by index so it works against any provider; the snapshot is taken
/// before callers mutate, since traversal positions shift under deletion.
pub fn scan_prefixed_keys(
    store: &dyn BackingStore,
    prefix: &str,
) -> Result<Vec<String>, BackingError> {
    let mut keys = Vec::new();
    let total = store.len()?;
    for i in 0..total {
        match store.key_at(i)? {
            Some(key) if key.starts_with(prefix) => keys.push(key),
            Some(_) => {}
            None => break,
        }
    }
    Ok(keys)
}

/// In-memory substitute for the host store.
///
/// Keys traverse in sorted order. An optional byte capacity (sum of key and
/// value lengths) makes `put` fail with `Full`, which the quota and rollback
/// tests rely on.
pub struct MemoryBackingStore {
    entries: RwLock<BTreeMap<String, String>>,
    capacity_bytes: Option<usize>,
}

impl MemoryBackingStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            capacity_bytes: None,
        }
    }

    /// A store that rejects writes once total bytes would exceed `bytes`.
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            capacity_bytes: Some(bytes),
        }
    }

    /// Current total of key and value lengths.
    pub fn used_bytes(&self) -> usize {
        self.entries
            .read()
            .iter()
            .map(|(k, v)| k.len() + v.len())
            .sum()
    }
}

impl Default for MemoryBackingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BackingStore for MemoryBackingStore {
    fn get(&self, key: &str) -> Result<Option<String>, BackingError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<(), BackingError> {
        let mut entries = self.entries.write();
        if let Some(cap) = self.capacity_bytes {
            let current: usize = entries.iter().map(|(k, v)| k.len() + v.len()).sum();
            let replaced = entries.get(key).map(|v| key.len() + v.len()).unwrap_or(0);
            let next = current - replaced + key.len() + value.len();
            if next > cap {
                return Err(BackingError::Full);
            }
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), BackingError> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn key_at(&self, index: usize) -> Result<Option<String>, BackingError> {
        Ok(self.entries.read().keys().nth(index).cloned())
    }

    fn len(&self) -> Result<usize, BackingError> {
        Ok(self.entries.read().len())
    }

    fn clear(&self) -> Result<(), BackingError> {
        self.entries.write().clear();
        Ok(())
    }
}
