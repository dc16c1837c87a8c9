//! Splitting encoded payloads into bounded shards.
//!
//! The chunker partitions the encoded payload's bytes into slices of the
//! configured shard size (the last slice may be short) and base64-encodes
//! each for storage. It never consults the backing store.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use strata_common::error::{StoreError, StoreResult};

/// Split `encoded` into base64 shards of at most `shard_size` octets each.
/// A payload of N bytes yields exactly `ceil(N / shard_size)` shards.
pub fn split(encoded: &str, shard_size: usize) -> Vec<String> {
    let shard = shard_size.max(1);
    encoded
        .as_bytes()
        .chunks(shard)
        .map(|slice| BASE64.encode(slice))
        .collect()
}

/// Reassemble shards in order. `size_hint` is the metadata's recorded payload
/// size; the output buffer is allocated once from it rather than grown per
/// shard.
pub fn join(chunks: &[String], size_hint: usize) -> StoreResult<String> {
    let mut bytes = Vec::with_capacity(size_hint);
    for (i, chunk) in chunks.iter().enumerate() {
        let decoded = BASE64
            .decode(chunk)
            .map_err(|e| StoreError::CorruptData(format!("chunk {} malformed: {}", i, e)))?;
        bytes.extend_from_slice(&decoded);
    }
    String::from_utf8(bytes)
        .map_err(|e| StoreError::CorruptData(format!("reassembled payload not UTF-8: {}", e)))
}
