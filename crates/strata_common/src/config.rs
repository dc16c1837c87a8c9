use serde::{Deserialize, Serialize};

/// Default namespace prefix shared by every engine on a backing store.
pub const DEFAULT_PREFIX: &str = "__lsm__";
/// Default shard size for chunked payloads: 128 KiB.
pub const DEFAULT_SHARD_SIZE: usize = 128 * 1024;
/// Default vacuum interval: 60 seconds.
pub const DEFAULT_VACUUM_INTERVAL_MS: u64 = 60_000;
/// Default soft quota: 4 MiB. Eviction starts above this.
pub const DEFAULT_QUOTA_SOFT: u64 = 4 * 1024 * 1024;
/// Default hard quota: 8 MiB.
pub const DEFAULT_QUOTA_HARD: u64 = 8 * 1024 * 1024;

/// Victim selection policy for quota eviction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EvictionPolicy {
    /// Evict the item with the oldest last-access timestamp.
    #[default]
    Lru,
    /// Evict the item with the smallest access counter.
    Lfu,
}

impl EvictionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionPolicy::Lru => "LRU",
            EvictionPolicy::Lfu => "LFU",
        }
    }
}

impl std::fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cross-context lease lock tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Lease duration; a holder past this is stale and may be overwritten.
    pub lease_ms: u64,
    /// Acquisition attempts before giving up (mutators proceed anyway).
    pub attempts: u32,
    /// Base inter-attempt delay; grows per attempt and is lightly jittered.
    pub base_delay_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lease_ms: 2_000,
            attempts: 8,
            base_delay_ms: 15,
        }
    }
}

/// Per-namespace engine configuration.
///
/// Every field has a serde default so a partial TOML/JSON document loads; the
/// backing store itself is injected at construction and is not part of this
/// record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Namespace isolating this engine's entries within the shared store.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Key prefix placed before the namespace.
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Compress payloads by default (per-set override available).
    #[serde(default)]
    pub compress: bool,
    /// Encrypt payloads by default (per-set override available). Enabling
    /// this provisions a per-namespace key record on init.
    #[serde(default)]
    pub encrypt: bool,
    /// Shard size in octets for chunked payloads.
    #[serde(default = "default_shard_size")]
    pub shard_size: usize,
    /// Background vacuum interval in milliseconds; 0 disables scheduling.
    #[serde(default = "default_vacuum_interval_ms")]
    pub vacuum_interval_ms: u64,
    #[serde(default)]
    pub eviction_policy: EvictionPolicy,
    /// Eviction runs while the estimated namespace size exceeds this.
    #[serde(default = "default_quota_soft")]
    pub quota_soft_limit: u64,
    /// Advisory upper bound reported in diagnostics.
    #[serde(default = "default_quota_hard")]
    pub quota_hard_limit: u64,
    /// Schema version stamped on newly written metadata.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    /// When false, no journal records are written; transaction rollback then
    /// has nothing to scan and becomes a no-op.
    #[serde(default = "default_true")]
    pub journaling: bool,
    /// Publish/consume cross-context change events.
    #[serde(default = "default_true")]
    pub broadcast: bool,
    /// Maintain engine counters.
    #[serde(default = "default_true")]
    pub metrics: bool,
    /// Allow `diagnostics()` reports.
    #[serde(default = "default_true")]
    pub diagnostics: bool,
    /// Initialize (key provisioning, vacuum schedule) on construction
    /// instead of on the first call to `ready()`.
    #[serde(default = "default_true")]
    pub auto_init: bool,
    #[serde(default)]
    pub lock: LockConfig,
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

fn default_shard_size() -> usize {
    DEFAULT_SHARD_SIZE
}

fn default_vacuum_interval_ms() -> u64 {
    DEFAULT_VACUUM_INTERVAL_MS
}

fn default_quota_soft() -> u64 {
    DEFAULT_QUOTA_SOFT
}

fn default_quota_hard() -> u64 {
    DEFAULT_QUOTA_HARD
}

fn default_schema_version() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            prefix: default_prefix(),
            compress: false,
            encrypt: false,
            shard_size: default_shard_size(),
            vacuum_interval_ms: default_vacuum_interval_ms(),
            eviction_policy: EvictionPolicy::default(),
            quota_soft_limit: default_quota_soft(),
            quota_hard_limit: default_quota_hard(),
            schema_version: default_schema_version(),
            journaling: true,
            broadcast: true,
            metrics: true,
            diagnostics: true,
            auto_init: true,
            lock: LockConfig::default(),
        }
    }
}

impl StoreConfig {
    /// Config for a named namespace with everything else at defaults.
    pub fn for_namespace(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_constants() {
        let cfg = StoreConfig::default();
        assert_eq!(cfg.namespace, "default");
        assert_eq!(cfg.prefix, "__lsm__");
        assert_eq!(cfg.shard_size, 131_072);
        assert_eq!(cfg.vacuum_interval_ms, 60_000);
        assert_eq!(cfg.eviction_policy, EvictionPolicy::Lru);
        assert_eq!(cfg.quota_soft_limit, 4 * 1024 * 1024);
        assert_eq!(cfg.quota_hard_limit, 8 * 1024 * 1024);
        assert_eq!(cfg.schema_version, 1);
        assert!(cfg.journaling && cfg.broadcast && cfg.auto_init);
    }

    #[test]
    fn test_partial_json_document_loads() {
        let cfg: StoreConfig =
            serde_json::from_str(r#"{"namespace": "app", "encrypt": true}"#).unwrap();
        assert_eq!(cfg.namespace, "app");
        assert!(cfg.encrypt);
        assert_eq!(cfg.shard_size, DEFAULT_SHARD_SIZE);
        assert_eq!(cfg.lock.attempts, 8);
    }

    #[test]
    fn test_eviction_policy_wire_names() {
        assert_eq!(
            serde_json::to_string(&EvictionPolicy::Lru).unwrap(),
            "\"LRU\""
        );
        let p: EvictionPolicy = serde_json::from_str("\"LFU\"").unwrap();
        assert_eq!(p, EvictionPolicy::Lfu);
    }
}
