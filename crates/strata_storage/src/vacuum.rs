//! Expired-item sweep and orphan reclamation.
//!
//! Vacuum scans metadata records and hands every expired item to the remove
//! pipeline. It also reclaims entries that violate the marker invariant:
//! metadata or chunks without a marker are corruption left behind by torn
//! writes and are deleted outright. The engine schedules the sweep on the
//! configured interval and exposes it on demand.

use std::collections::HashSet;

use strata_common::error::StoreResult;

use crate::backing::{scan_prefixed_keys, BackingStore};
use crate::keys::{KeyKind, KeyLayout};
use crate::meta::MetaRegistry;

/// User keys whose metadata carries an expiry deadline at or before `now`.
pub fn collect_expired(
    store: &dyn BackingStore,
    layout: &KeyLayout,
    registry: &MetaRegistry,
    now: u64,
) -> StoreResult<Vec<String>> {
    let mut expired = Vec::new();
    for raw in scan_prefixed_keys(store, &layout.namespace_prefix())? {
        let Some(KeyKind::Meta(user_key)) = layout.classify(&raw) else {
            continue;
        };
        if let Ok(Some(meta)) = registry.read(&user_key) {
            if meta.is_expired(now) {
                expired.push(user_key);
            }
        }
    }
    Ok(expired)
}

/// Raw keys of metadata and chunk entries whose marker is gone.
pub fn collect_orphans(store: &dyn BackingStore, layout: &KeyLayout) -> StoreResult<Vec<String>> {
    let keys = scan_prefixed_keys(store, &layout.namespace_prefix())?;
    let markers: HashSet<String> = keys
        .iter()
        .filter_map(|raw| match layout.classify(raw) {
            Some(KeyKind::Marker(user_key)) => Some(user_key),
            _ => None,
        })
        .collect();

    let mut orphans = Vec::new();
    for raw in keys {
        let user_key = match layout.classify(&raw) {
            Some(KeyKind::Meta(k)) => k,
            Some(KeyKind::Chunk(k, _)) => k,
            _ => continue,
        };
        if !markers.contains(&user_key) {
            orphans.push(raw);
        }
    }
    Ok(orphans)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::backing::MemoryBackingStore;
    use crate::meta::ItemMeta;

    fn setup() -> (Arc<MemoryBackingStore>, KeyLayout, MetaRegistry) {
        let store = Arc::new(MemoryBackingStore::new());
        let layout = KeyLayout::new("__lsm__", "t");
        let registry = MetaRegistry::new(store.clone() as Arc<dyn BackingStore>, layout.clone());
        (store, layout, registry)
    }

    fn meta_with_expiry(expires_at: Option<u64>) -> ItemMeta {
        ItemMeta {
            created_at: 0,
            updated_at: 0,
            ttl_ms: None,
            expires_at,
            compressed: false,
            encrypted: false,
            chunks: 1,
            size: 4,
            lru: 0,
            lfu: 0,
            index_keys: vec![],
            schema_version: 1,
        }
    }

    #[test]
    fn test_collect_expired() {
        let (store, layout, registry) = setup();
        registry.write("old", &meta_with_expiry(Some(100))).unwrap();
        registry.write("live", &meta_with_expiry(Some(10_000))).unwrap();
        registry.write("forever", &meta_with_expiry(None)).unwrap();
        let expired = collect_expired(store.as_ref(), &layout, &registry, 500).unwrap();
        assert_eq!(expired, vec!["old"]);
    }

    #[test]
    fn test_collect_orphans() {
        let (store, layout, registry) = setup();
        // Intact item: marker + meta + chunk.
        store.put(&layout.marker("ok"), "{}").unwrap();
        registry.write("ok", &meta_with_expiry(None)).unwrap();
        store.put(&layout.chunk("ok", 0), "AAAA").unwrap();
        // Orphans: meta and chunk with no marker.
        registry.write("ghost", &meta_with_expiry(None)).unwrap();
        store.put(&layout.chunk("ghost", 0), "BBBB").unwrap();
        store.put(&layout.chunk("ghost", 1), "CCCC").unwrap();

        let mut orphans = collect_orphans(store.as_ref(), &layout).unwrap();
        orphans.sort();
        let mut expected = vec![
            layout.meta("ghost"),
            layout.chunk("ghost", 0),
            layout.chunk("ghost", 1),
        ];
        expected.sort();
        assert_eq!(orphans, expected);
    }

    #[test]
    fn test_internal_records_are_not_orphans() {
        let (store, layout, _) = setup();
        store.put(&layout.journal(), "[]").unwrap();
        store.put(&layout.lock(), "{}").unwrap();
        store.put(&layout.key_record(), "AAAA").unwrap();
        store.put(&layout.index("byRole"), "{}").unwrap();
        assert!(collect_orphans(store.as_ref(), &layout).unwrap().is_empty());
    }
}
