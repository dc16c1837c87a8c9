//! Lease-based cooperative lock shared by all contexts of a namespace.
//!
//! The backing store has no compare-and-swap, so the check-then-write here
//! is inherently racy; the post-write re-read narrows the window but cannot
//! close it. Acquisition exhausting its attempts returns `false` rather than
//! erroring; mutators proceed and the miss is only visible in counters.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::backing::BackingStore;
use crate::meta::now_ms;

/// Upper bound on a single inter-attempt delay.
const MAX_DELAY_MS: u64 = 250;

/// The lock record stored at the namespace lock key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
    pub owner_id: String,
    /// Unix millis past which the lease is stale and may be overwritten.
    pub expires_at: u64,
}

/// One context's handle on the namespace lock.
pub struct LeaseLock {
    store: Arc<dyn BackingStore>,
    key: String,
    owner_id: String,
    lease_ms: u64,
}

impl LeaseLock {
    pub fn new(store: Arc<dyn BackingStore>, key: String, owner_id: String, lease_ms: u64) -> Self {
        Self {
            store,
            key,
            owner_id,
            lease_ms,
        }
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// The current lock record, if any and parsable.
    pub fn peek(&self) -> Option<LockRecord> {
        let raw = self.store.get(&self.key).ok().flatten()?;
        serde_json::from_str(&raw).ok()
    }

    /// Try to take the lease. Each attempt reads the record, overwrites it
    /// when absent, stale, or already ours, then re-reads to detect a racing
    /// writer. Sleeps a growing, jittered delay between attempts.
    pub async fn acquire(&self, attempts: u32, base_delay: Duration) -> bool {
        let attempts = attempts.max(1);
        for attempt in 1..=attempts {
            let now = now_ms();
            let takeable = match self.peek() {
                None => true,
                Some(rec) => rec.owner_id == self.owner_id || rec.expires_at < now,
            };
            if takeable && self.write_record(now) {
                match self.peek() {
                    Some(rec) if rec.owner_id == self.owner_id => return true,
                    _ => {}
                }
            }
            if attempt < attempts {
                tokio::time::sleep(jittered_delay(base_delay, attempt)).await;
            }
        }
        false
    }

    /// Delete the record, but only while it still belongs to this owner.
    pub fn release(&self) {
        if let Some(rec) = self.peek() {
            if rec.owner_id == self.owner_id {
                let _ = self.store.delete(&self.key);
            }
        }
    }

    fn write_record(&self, now: u64) -> bool {
        let rec = LockRecord {
            owner_id: self.owner_id.clone(),
            expires_at: now + self.lease_ms,
        };
        let text = match serde_json::to_string(&rec) {
            Ok(t) => t,
            Err(_) => return false,
        };
        self.store.put(&self.key, &text).is_ok()
    }
}

/// Delay grows linearly with the attempt number and carries ±25% jitter so
/// contending contexts drift apart instead of colliding on each retry.
fn jittered_delay(base: Duration, attempt: u32) -> Duration {
    let base_ms = (base.as_millis() as u64).max(1) * attempt as u64;
    let jitter_span = (base_ms / 4).max(1);
    let offset = rand::thread_rng().gen_range(0..=jitter_span * 2);
    let ms = (base_ms + offset).saturating_sub(jitter_span).min(MAX_DELAY_MS);
    Duration::from_millis(ms)
}
