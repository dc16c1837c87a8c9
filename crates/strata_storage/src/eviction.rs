//! Quota estimation and eviction victim selection.
//!
//! After every successful write the engine estimates the namespace's byte
//! footprint (sum of key and value lengths over all prefixed entries) and,
//! while it exceeds the soft quota, removes one victim per iteration through
//! the full remove pipeline. Victim choice follows the configured policy:
//! LRU picks the smallest last-access timestamp, LFU the smallest access
//! counter; ties keep the first candidate in store traversal order.

use strata_common::config::EvictionPolicy;
use strata_common::error::StoreResult;

use crate::backing::{scan_prefixed_keys, BackingStore};
use crate::keys::{KeyKind, KeyLayout};
use crate::meta::MetaRegistry;

/// Upper bound on victims removed per `maybe_evict` call.
pub const MAX_EVICTIONS_PER_CALL: usize = 1000;

/// Estimated byte footprint of the namespace.
pub fn estimate_namespace_bytes(store: &dyn BackingStore, layout: &KeyLayout) -> StoreResult<u64> {
    let mut total = 0u64;
    for key in scan_prefixed_keys(store, &layout.namespace_prefix())? {
        let value_len = store.get(&key)?.map(|v| v.len()).unwrap_or(0);
        total += (key.len() + value_len) as u64;
    }
    Ok(total)
}

/// Select the next eviction victim, or `None` when no candidate remains.
///
/// `exclude` shields the key whose write triggered the sweep; an item is
/// never its own victim.
pub fn select_victim(
    store: &dyn BackingStore,
    layout: &KeyLayout,
    registry: &MetaRegistry,
    policy: EvictionPolicy,
    exclude: Option<&str>,
) -> StoreResult<Option<String>> {
    let mut best: Option<(u64, String)> = None;
    for raw in scan_prefixed_keys(store, &layout.namespace_prefix())? {
        let Some(KeyKind::Meta(user_key)) = layout.classify(&raw) else {
            continue;
        };
        if exclude == Some(user_key.as_str()) {
            continue;
        }
        let Ok(Some(meta)) = registry.read(&user_key) else {
            continue;
        };
        let weight = match policy {
            EvictionPolicy::Lru => meta.lru,
            EvictionPolicy::Lfu => meta.lfu,
        };
        // Strict comparison keeps the first candidate on ties.
        match &best {
            Some((current, _)) if weight >= *current => {}
            _ => best = Some((weight, user_key)),
        }
    }
    Ok(best.map(|(_, key)| key))
}
