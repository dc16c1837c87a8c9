//! Engine operation counters (lock-free atomics).

use std::sync::atomic::{AtomicU64, Ordering};

/// Cumulative engine statistics.
#[derive(Debug, Default)]
pub struct EngineStats {
    pub(crate) reads: AtomicU64,
    pub(crate) writes: AtomicU64,
    pub(crate) removes: AtomicU64,
    pub(crate) transactions: AtomicU64,
    pub(crate) rollbacks: AtomicU64,
    pub(crate) vacuums: AtomicU64,
    pub(crate) evictions: AtomicU64,
    pub(crate) broadcasts: AtomicU64,
    /// Reads that found a marker but missing/malformed metadata or chunks.
    pub(crate) corrupt_reads: AtomicU64,
    /// Lock acquisitions that exhausted their attempts.
    pub(crate) lock_failures: AtomicU64,
    /// Non-zero means a degenerate cipher is in use and confidentiality is
    /// NOT provided. Always zero with the real AEAD.
    pub(crate) degraded_crypto: AtomicU64,
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Take an immutable snapshot for reporting.
    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            removes: self.removes.load(Ordering::Relaxed),
            transactions: self.transactions.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
            vacuums: self.vacuums.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            corrupt_reads: self.corrupt_reads.load(Ordering::Relaxed),
            lock_failures: self.lock_failures.load(Ordering::Relaxed),
            degraded_crypto: self.degraded_crypto.load(Ordering::Relaxed),
        }
    }
}

/// Immutable snapshot of [`EngineStats`] for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStatsSnapshot {
    pub reads: u64,
    pub writes: u64,
    pub removes: u64,
    pub transactions: u64,
    pub rollbacks: u64,
    pub vacuums: u64,
    pub evictions: u64,
    pub broadcasts: u64,
    pub corrupt_reads: u64,
    pub lock_failures: u64,
    pub degraded_crypto: u64,
}
