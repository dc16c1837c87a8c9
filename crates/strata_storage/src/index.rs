//! Secondary indexes: field-value → ordered key-set maps.
//!
//! Each index is one JSON object at a deterministic key, mapping the
//! stringified field value to the list of user keys in insertion order.
//! Mutations read, modify, and write the whole record; indexes are small
//! relative to items, so the read-modify-write is tolerable. Emptied buckets
//! are kept and answer queries with an empty sequence.

use std::collections::BTreeMap;
use std::sync::Arc;

use strata_common::error::StoreResult;

use crate::backing::BackingStore;
use crate::keys::KeyLayout;

type Buckets = BTreeMap<String, Vec<String>>;

pub struct IndexRegistry {
    store: Arc<dyn BackingStore>,
    layout: KeyLayout,
}

impl IndexRegistry {
    pub fn new(store: Arc<dyn BackingStore>, layout: KeyLayout) -> Self {
        Self { store, layout }
    }

    /// Create an index record if it does not exist yet.
    pub fn create(&self, index_name: &str) -> StoreResult<()> {
        let key = self.layout.index(index_name);
        if self.store.get(&key)?.is_none() {
            self.store.put(&key, "{}")?;
        }
        Ok(())
    }

    /// Append `user_key` to the bucket for `field_value` unless present.
    pub fn ensure(&self, index_name: &str, field_value: &str, user_key: &str) -> StoreResult<()> {
        let mut buckets = self.read(index_name)?;
        let bucket = buckets.entry(field_value.to_string()).or_default();
        if !bucket.iter().any(|k| k == user_key) {
            bucket.push(user_key.to_string());
        }
        self.write(index_name, &buckets)
    }

    /// Remove `user_key` from the bucket for `field_value`. The bucket stays
    /// behind even when emptied.
    pub fn remove(&self, index_name: &str, field_value: &str, user_key: &str) -> StoreResult<()> {
        let mut buckets = self.read(index_name)?;
        if let Some(bucket) = buckets.get_mut(field_value) {
            bucket.retain(|k| k != user_key);
            self.write(index_name, &buckets)?;
        }
        Ok(())
    }

    /// The user keys filed under `field_value`, in insertion order.
    pub fn query(&self, index_name: &str, field_value: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .read(index_name)?
            .get(field_value)
            .cloned()
            .unwrap_or_default())
    }

    /// All field values the index has buckets for.
    pub fn list(&self, index_name: &str) -> StoreResult<Vec<String>> {
        Ok(self.read(index_name)?.keys().cloned().collect())
    }

    fn read(&self, index_name: &str) -> StoreResult<Buckets> {
        match self.store.get(&self.layout.index(index_name))? {
            None => Ok(Buckets::new()),
            Some(text) => match serde_json::from_str(&text) {
                Ok(buckets) => Ok(buckets),
                Err(e) => {
                    tracing::warn!("index {} unparsable, resetting: {}", index_name, e);
                    Ok(Buckets::new())
                }
            },
        }
    }

    fn write(&self, index_name: &str, buckets: &Buckets) -> StoreResult<()> {
        let text = serde_json::to_string(buckets)?;
        self.store.put(&self.layout.index(index_name), &text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backing::MemoryBackingStore;

    fn registry() -> IndexRegistry {
        IndexRegistry::new(
            Arc::new(MemoryBackingStore::new()),
            KeyLayout::new("__lsm__", "t"),
        )
    }

    #[test]
    fn test_ensure_preserves_insertion_order() {
        let reg = registry();
        reg.ensure("byRole", "admin", "u1").unwrap();
        reg.ensure("byRole", "admin", "u2").unwrap();
        reg.ensure("byRole", "admin", "u1").unwrap(); // duplicate ignored
        assert_eq!(reg.query("byRole", "admin").unwrap(), vec!["u1", "u2"]);
    }

    #[test]
    fn test_remove_leaves_empty_bucket_queryable() {
        let reg = registry();
        reg.ensure("byRole", "admin", "u1").unwrap();
        reg.remove("byRole", "admin", "u1").unwrap();
        assert!(reg.query("byRole", "admin").unwrap().is_empty());
        // The bucket itself survives.
        assert_eq!(reg.list("byRole").unwrap(), vec!["admin"]);
    }

    #[test]
    fn test_query_unknown_index_is_empty() {
        let reg = registry();
        assert!(reg.query("ghost", "x").unwrap().is_empty());
        assert!(reg.list("ghost").unwrap().is_empty());
    }

    #[test]
    fn test_create_is_idempotent() {
        let reg = registry();
        reg.create("byRole").unwrap();
        reg.ensure("byRole", "admin", "u1").unwrap();
        reg.create("byRole").unwrap(); // must not wipe existing buckets
        assert_eq!(reg.query("byRole", "admin").unwrap(), vec!["u1"]);
    }

    #[test]
    fn test_field_values_with_colons() {
        let reg = registry();
        reg.ensure("byUrl", "https://example.com:8080", "u1").unwrap();
        assert_eq!(
            reg.query("byUrl", "https://example.com:8080").unwrap(),
            vec!["u1"]
        );
        reg.remove("byUrl", "https://example.com:8080", "u1").unwrap();
        assert!(reg.query("byUrl", "https://example.com:8080").unwrap().is_empty());
    }

    #[test]
    fn test_independent_buckets() {
        let reg = registry();
        reg.ensure("byRole", "admin", "u1").unwrap();
        reg.ensure("byRole", "viewer", "u2").unwrap();
        assert_eq!(reg.query("byRole", "admin").unwrap(), vec!["u1"]);
        assert_eq!(reg.query("byRole", "viewer").unwrap(), vec!["u2"]);
        assert_eq!(reg.list("byRole").unwrap(), vec!["admin", "viewer"]);
    }
}
