//! The engine facade.
//!
//! Orchestrates the full write/read/remove pipeline over the components:
//! serialize → compress → encrypt → chunk → journal → lock → commit →
//! index → broadcast → evict, with journaled rollback when a commit fails
//! part-way. One instance owns one namespace; peers in other contexts are
//! coordinated only through the lease lock and the broadcast bridge.

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, OnceCell};

use strata_common::config::StoreConfig;
use strata_common::error::{StoreError, StoreResult};
use strata_common::shutdown::ShutdownSignal;

use crate::backing::{scan_prefixed_keys, BackingStore};
use crate::broadcast::{BroadcastKind, BroadcastMessage, BroadcastTransport};
use crate::chunk;
use crate::codec::{Codec, EncryptionKey};
use crate::events::{EngineEvent, EventBus};
use crate::eviction::{self, MAX_EVICTIONS_PER_CALL};
use crate::index::IndexRegistry;
use crate::journal::{Journal, JournalRecord};
use crate::keys::{KeyKind, KeyLayout};
use crate::lock::LeaseLock;
use crate::meta::{now_ms, IndexRef, ItemMeta, Marker, MetaRegistry};
use crate::stats::{EngineStats, EngineStatsSnapshot};
use crate::vacuum;

/// Per-set options. Unset fields fall back to the namespace configuration.
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Time-to-live in milliseconds; the item expires at write-time + ttl.
    pub ttl_ms: Option<u64>,
    pub compress: Option<bool>,
    pub encrypt: Option<bool>,
    /// Secondary indexes to file this item under.
    pub indexes: Vec<IndexSpec>,
}

/// One secondary-index participation: file the item under `name`, bucketed
/// by the stringified form of `value[field]`.
#[derive(Debug, Clone)]
pub struct IndexSpec {
    pub name: String,
    pub field: String,
}

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub include_indexes: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            include_indexes: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ImportOptions {
    /// Overwrite entries whose key already exists.
    pub overwrite: bool,
}

/// A portable dump of every namespaced entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub namespace: String,
    pub prefix: String,
    pub schema_version: u32,
    pub include_indexes: bool,
    /// Raw key → raw value. `None` marks a snapshot that cannot be imported.
    pub data: Option<BTreeMap<String, String>>,
    /// Unix millis at export time.
    pub exported_at: u64,
}

/// Rewrites items from one schema version to the next during `migrate`.
pub trait MigrationAdapter: Send + Sync {
    /// Transform one item. The returned metadata's `index_keys` are re-filed
    /// for the rewritten item; ttl/compress/encrypt are preserved from the
    /// stored metadata regardless.
    fn up(&self, meta: &ItemMeta, value: Value) -> StoreResult<(ItemMeta, Value)>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Items whose metadata was readable.
    pub scanned: usize,
    /// Items rewritten to the target version.
    pub migrated: usize,
}

/// Point-in-time health report for one namespace.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsReport {
    pub namespace: String,
    pub prefix: String,
    pub items: usize,
    pub estimated_bytes: u64,
    pub quota_soft_limit: u64,
    pub quota_hard_limit: u64,
    pub journal_records: usize,
    pub lock_holder: Option<String>,
    pub schema_version: u32,
    pub compress: bool,
    pub encrypt: bool,
}

struct EngineInner {
    config: StoreConfig,
    store: Arc<dyn BackingStore>,
    layout: KeyLayout,
    codec: RwLock<Codec>,
    journal: Journal,
    lock: LeaseLock,
    indexes: IndexRegistry,
    meta: MetaRegistry,
    stats: EngineStats,
    events: EventBus,
    transport: Option<Arc<dyn BroadcastTransport>>,
    origin_id: String,
    destroyed: AtomicBool,
    shutdown: ShutdownSignal,
    init_cell: OnceCell<()>,
}

/// The namespaced storage engine. Cheap to clone; clones share one instance.
#[derive(Clone)]
pub struct StorageEngine {
    inner: Arc<EngineInner>,
}

impl StorageEngine {
    /// Build an engine over `store`. Initializes immediately when the config
    /// says `auto_init`; otherwise the first operation (or `ready()`) does.
    pub async fn new(config: StoreConfig, store: Arc<dyn BackingStore>) -> StoreResult<Self> {
        Self::build(config, store, None).await
    }

    /// Build an engine wired to a cross-context broadcast transport.
    pub async fn with_transport(
        config: StoreConfig,
        store: Arc<dyn BackingStore>,
        transport: Arc<dyn BroadcastTransport>,
    ) -> StoreResult<Self> {
        Self::build(config, store, Some(transport)).await
    }

    async fn build(
        config: StoreConfig,
        store: Arc<dyn BackingStore>,
        transport: Option<Arc<dyn BroadcastTransport>>,
    ) -> StoreResult<Self> {
        let layout = KeyLayout::new(&config.prefix, &config.namespace);
        let origin_id = format!("{:016x}", rand::random::<u64>());
        let journal = Journal::new(store.clone(), layout.journal(), config.journaling);
        let lock = LeaseLock::new(
            store.clone(),
            layout.lock(),
            origin_id.clone(),
            config.lock.lease_ms,
        );
        let indexes = IndexRegistry::new(store.clone(), layout.clone());
        let meta = MetaRegistry::new(store.clone(), layout.clone());
        let auto_init = config.auto_init;

        let engine = Self {
            inner: Arc::new(EngineInner {
                config,
                store,
                layout,
                codec: RwLock::new(Codec::new(None)),
                journal,
                lock,
                indexes,
                meta,
                stats: EngineStats::new(),
                events: EventBus::new(),
                transport,
                origin_id,
                destroyed: AtomicBool::new(false),
                shutdown: ShutdownSignal::new(),
                init_cell: OnceCell::new(),
            }),
        };
        if auto_init {
            engine.ready().await?;
        }
        Ok(engine)
    }

    /// Await initialization: encryption key provisioning, vacuum scheduling,
    /// and the broadcast listener. Idempotent.
    pub async fn ready(&self) -> StoreResult<()> {
        if self.inner.init_cell.initialized() {
            return Ok(());
        }
        self.check_alive()?;
        self.inner
            .init_cell
            .get_or_try_init(|| self.init_once())
            .await?;
        Ok(())
    }

    async fn init_once(&self) -> StoreResult<()> {
        if self.inner.config.encrypt {
            let key_record = self.inner.layout.key_record();
            let key = match self.inner.store.get(&key_record)? {
                Some(encoded) => EncryptionKey::from_base64(&encoded)?,
                None => {
                    let key = EncryptionKey::generate();
                    self.inner.store.put(&key_record, &key.to_base64())?;
                    key
                }
            };
            *self.inner.codec.write() = Codec::new(Some(key));
        }

        if self.inner.config.vacuum_interval_ms > 0 {
            let engine = self.clone();
            let interval = Duration::from_millis(self.inner.config.vacuum_interval_ms);
            let shutdown = self.inner.shutdown.clone();
            tokio::spawn(async move {
                while !shutdown.wait_timeout(interval).await {
                    if let Err(e) = engine.vacuum_sweep().await {
                        tracing::warn!("scheduled vacuum failed: {}", e);
                    }
                }
            });
        }

        if self.inner.config.broadcast {
            if let Some(transport) = self.inner.transport.clone() {
                let engine = self.clone();
                let shutdown = self.inner.shutdown.clone();
                let mut rx = transport.subscribe();
                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            _ = shutdown.wait() => break,
                            msg = rx.recv() => match msg {
                                Ok(text) => engine.handle_peer_message(&text),
                                Err(RecvError::Lagged(skipped)) => {
                                    tracing::debug!(skipped, "broadcast receiver lagged");
                                }
                                Err(RecvError::Closed) => break,
                            },
                        }
                    }
                });
            }
        }

        tracing::debug!(
            namespace = %self.inner.config.namespace,
            origin = %self.inner.origin_id,
            "engine initialized"
        );
        Ok(())
    }

    /// Stop background tasks and refuse all further mutations.
    pub fn destroy(&self) {
        self.inner.shutdown.shutdown();
        self.inner.destroyed.store(true, Ordering::SeqCst);
        tracing::debug!(namespace = %self.inner.config.namespace, "engine destroyed");
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn origin_id(&self) -> &str {
        &self.inner.origin_id
    }

    pub fn stats(&self) -> EngineStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Subscribe to local change events. Lossy on lag.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    // ── Write path ──

    /// Store `value` under `key`. Returns `Ok(true)` on commit; any failure
    /// rolls the partial write back and surfaces the original error.
    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        opts: SetOptions,
    ) -> StoreResult<bool> {
        self.check_alive()?;
        self.ready().await?;
        let started = Instant::now();

        let value = serde_json::to_value(value)?;
        let compress = opts.compress.unwrap_or(self.inner.config.compress);
        let encrypt = opts.encrypt.unwrap_or(self.inner.config.encrypt);
        let encoded = self
            .inner
            .codec
            .read()
            .encode(&value, compress, encrypt)?;
        let chunks = chunk::split(&encoded, self.inner.config.shard_size);

        let now = now_ms();
        let previous = self.inner.meta.read(key).unwrap_or(None);
        let mut meta = ItemMeta {
            created_at: previous.as_ref().map(|m| m.created_at).unwrap_or(now),
            updated_at: now,
            ttl_ms: opts.ttl_ms,
            expires_at: opts.ttl_ms.map(|ttl| now + ttl),
            compressed: compress,
            encrypted: encrypt,
            chunks: chunks.len(),
            size: encoded.len(),
            lru: now,
            lfu: 0,
            index_keys: Vec::new(),
            schema_version: self.inner.config.schema_version,
        };

        let marker_key = self.inner.layout.marker(key);
        self.inner.journal.append(JournalRecord::SetBegin {
            key: marker_key,
            ts: now,
            meta: meta.clone(),
        })?;
        self.acquire_lock(self.inner.config.lock.attempts).await;

        if let Err(e) = self.commit_set(key, &chunks, &mut meta, &previous, &opts.indexes, &value) {
            self.rollback_set(key, chunks.len());
            self.inner.lock.release();
            return Err(e);
        }

        if let Err(e) = self.maybe_evict(Some(key)).await {
            tracing::warn!("eviction after set failed: {}", e);
        }
        self.inner.lock.release();
        self.inner.events.emit(EngineEvent::Set {
            key: key.to_string(),
        });
        self.count(&self.inner.stats.writes);
        tracing::debug!(
            key,
            chunks = meta.chunks,
            bytes = meta.size,
            elapsed_us = started.elapsed().as_micros() as u64,
            "set committed"
        );
        Ok(true)
    }

    /// Steps 5–10 of the write protocol. Any error leaves rollback to the
    /// caller.
    fn commit_set(
        &self,
        key: &str,
        chunks: &[String],
        meta: &mut ItemMeta,
        previous: &Option<ItemMeta>,
        index_specs: &[IndexSpec],
        value: &Value,
    ) -> StoreResult<()> {
        let inner = &self.inner;

        for (i, chunk_body) in chunks.iter().enumerate() {
            inner.store.put(&inner.layout.chunk(key, i), chunk_body)?;
        }
        // An overwrite that shrank the item leaves stale tail chunks behind.
        if let Some(prev) = previous {
            for i in chunks.len()..prev.chunks {
                inner.store.delete(&inner.layout.chunk(key, i))?;
            }
        }

        inner.meta.write(key, meta)?;

        let marker = Marker {
            chunks: chunks.len(),
            meta_ref: inner.layout.meta(key),
        };
        inner
            .store
            .put(&inner.layout.marker(key), &serde_json::to_string(&marker)?)?;

        // Re-file index entries: drop the previous item's refs, then ensure
        // the new ones and persist them on the metadata.
        if let Some(prev) = previous {
            for r in &prev.index_keys {
                inner.indexes.remove(&r.index, &r.value, key)?;
            }
        }
        let mut refs = Vec::new();
        for spec in index_specs {
            let Some(field_value) = value.get(spec.field.as_str()) else {
                continue;
            };
            if field_value.is_null() {
                continue;
            }
            let bucket = stringify_field(field_value);
            inner.indexes.ensure(&spec.name, &bucket, key)?;
            refs.push(IndexRef {
                index: spec.name.clone(),
                value: bucket,
            });
        }
        if !refs.is_empty() {
            meta.index_keys = refs;
            inner.meta.write(key, meta)?;
        }

        self.publish(BroadcastKind::Set, Some(key.to_string()));
        inner.journal.append(JournalRecord::SetEnd {
            key: inner.layout.marker(key),
            ts: now_ms(),
        })?;
        Ok(())
    }

    /// Delete everything a failed write may have left behind. Rollback is
    /// silent: its own failures are logged, never surfaced.
    fn rollback_set(&self, key: &str, chunk_count: usize) {
        let inner = &self.inner;
        for i in 0..chunk_count {
            let _ = inner.store.delete(&inner.layout.chunk(key, i));
        }
        let _ = inner.meta.delete(key);
        let _ = inner.store.delete(&inner.layout.marker(key));
        let _ = inner.journal.append(JournalRecord::SetRollback {
            key: inner.layout.marker(key),
            ts: now_ms(),
        });
        self.count(&inner.stats.rollbacks);
        tracing::debug!(key, "set rolled back");
    }

    // ── Read path ──

    /// Read the raw JSON value under `key`. `Ok(None)` covers absence,
    /// expiry, and every corruption the read path degrades on.
    pub async fn get_value(&self, key: &str) -> StoreResult<Option<Value>> {
        self.ready().await?;
        let inner = &self.inner;

        let Some(marker_text) = inner.store.get(&inner.layout.marker(key))? else {
            return Ok(None);
        };
        let Ok(marker) = serde_json::from_str::<Marker>(&marker_text) else {
            return Ok(self.degrade_read(key, "marker unparsable"));
        };

        let meta = match inner.meta.read(key) {
            Ok(Some(meta)) => meta,
            Ok(None) => return Ok(self.degrade_read(key, "metadata missing")),
            Err(_) => return Ok(self.degrade_read(key, "metadata unparsable")),
        };

        let now = now_ms();
        if meta.is_expired(now) {
            let _ = self.remove(key).await;
            return Ok(None);
        }

        let mut chunks = Vec::with_capacity(marker.chunks);
        for i in 0..marker.chunks {
            match inner.store.get(&inner.layout.chunk(key, i))? {
                Some(body) => chunks.push(body),
                None => return Ok(self.degrade_read(key, "chunk missing")),
            }
        }
        let encoded = match chunk::join(&chunks, meta.size) {
            Ok(text) => text,
            Err(_) => return Ok(self.degrade_read(key, "chunks unparsable")),
        };

        let text = match self
            .inner
            .codec
            .read()
            .decode(&encoded, meta.compressed, meta.encrypted)
        {
            Ok(text) => text,
            Err(e) if e.degrades_on_read() => {
                return Ok(self.degrade_read(key, "payload undecodable"))
            }
            // CryptoFail surfaces: a present key that fails authentication
            // is tampering, not absence.
            Err(e) => return Err(e),
        };

        // Values predating the engine may be bare strings; serve them as-is.
        let value = serde_json::from_str(&text).unwrap_or(Value::String(text));

        if let Err(e) = inner.meta.touch(key, now) {
            tracing::debug!(key, "touch failed: {}", e);
        }
        inner.events.emit(EngineEvent::Get {
            key: key.to_string(),
        });
        self.count(&inner.stats.reads);
        Ok(Some(value))
    }

    /// Typed read over [`get_value`].
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        match self.get_value(key).await? {
            None => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| StoreError::Serialization(e.to_string())),
        }
    }

    fn degrade_read(&self, key: &str, what: &str) -> Option<Value> {
        self.count(&self.inner.stats.corrupt_reads);
        tracing::debug!(key, "corrupt read ({}), degrading to absent", what);
        None
    }

    /// Whether `key` currently exists and is not expired. Does not touch
    /// access tracking.
    pub async fn has(&self, key: &str) -> StoreResult<bool> {
        self.ready().await?;
        if self.inner.store.get(&self.inner.layout.marker(key))?.is_none() {
            return Ok(false);
        }
        match self.inner.meta.read(key) {
            Ok(Some(meta)) => Ok(!meta.is_expired(now_ms())),
            _ => Ok(false),
        }
    }

    /// All live user keys in this namespace.
    pub async fn list_keys(&self) -> StoreResult<Vec<String>> {
        self.ready().await?;
        let raws = scan_prefixed_keys(
            self.inner.store.as_ref(),
            &self.inner.layout.namespace_prefix(),
        )?;
        let now = now_ms();
        let mut keys = Vec::new();
        for raw in raws {
            let Some(KeyKind::Marker(user_key)) = self.inner.layout.classify(&raw) else {
                continue;
            };
            if let Ok(Some(meta)) = self.inner.meta.read(&user_key) {
                if !meta.is_expired(now) {
                    keys.push(user_key);
                }
            }
        }
        Ok(keys)
    }

    // ── Remove path ──

    /// Delete `key` and every entry belonging to it. `Ok(false)` when the
    /// item did not exist.
    pub async fn remove(&self, key: &str) -> StoreResult<bool> {
        self.check_alive()?;
        self.ready().await?;
        self.remove_inner(key).await
    }

    /// Remove body, shared by the public `remove` entry point and
    /// `vacuum_sweep`. Does not call `ready()` itself, for the same reason
    /// `vacuum_sweep` doesn't: both only ever run once initialization has
    /// completed, and going through `ready()` here would make the
    /// background scheduler task's future type recursively depend on
    /// `init_once`'s.
    async fn remove_inner(&self, key: &str) -> StoreResult<bool> {
        let inner = &self.inner;

        let Some(meta) = inner.meta.read(key).unwrap_or(None) else {
            // A marker without metadata is corruption; reclaim the marker.
            inner.store.delete(&inner.layout.marker(key))?;
            return Ok(false);
        };

        let marker_key = inner.layout.marker(key);
        inner.journal.append(JournalRecord::RemoveBegin {
            key: marker_key.clone(),
            ts: now_ms(),
        })?;
        self.acquire_lock(inner.config.lock.attempts).await;

        let result: StoreResult<()> = (|| {
            for i in 0..meta.chunks {
                inner.store.delete(&inner.layout.chunk(key, i))?;
            }
            inner.meta.delete(key)?;
            inner.store.delete(&marker_key)?;
            for r in &meta.index_keys {
                inner.indexes.remove(&r.index, &r.value, key)?;
            }
            self.publish(BroadcastKind::Remove, Some(key.to_string()));
            inner.journal.append(JournalRecord::RemoveEnd {
                key: marker_key.clone(),
                ts: now_ms(),
            })?;
            Ok(())
        })();

        match result {
            Ok(()) => {
                inner.lock.release();
                inner.events.emit(EngineEvent::Remove {
                    key: key.to_string(),
                });
                self.count(&inner.stats.removes);
                Ok(true)
            }
            Err(e) => {
                // Partial deletions stay; the rollback record is informational.
                let _ = inner.journal.append(JournalRecord::RemoveRollback {
                    key: marker_key,
                    ts: now_ms(),
                });
                self.count(&inner.stats.rollbacks);
                inner.lock.release();
                Err(e)
            }
        }
    }

    /// Delete every namespaced entry except the lock and the encryption key
    /// record. Returns the number of entries deleted.
    pub async fn clear(&self) -> StoreResult<usize> {
        self.check_alive()?;
        self.ready().await?;
        self.acquire_lock(self.inner.config.lock.attempts).await;

        let raws = scan_prefixed_keys(
            self.inner.store.as_ref(),
            &self.inner.layout.namespace_prefix(),
        )?;
        let mut removed = 0;
        for raw in raws {
            if matches!(
                self.inner.layout.classify(&raw),
                Some(KeyKind::Lock) | Some(KeyKind::KeyRecord)
            ) {
                continue;
            }
            self.inner.store.delete(&raw)?;
            removed += 1;
        }
        self.publish(BroadcastKind::Clear, None);
        self.inner.lock.release();
        self.inner.events.emit(EngineEvent::Clear);
        Ok(removed)
    }

    // ── Transactions ──

    /// Run `f` with a handle whose operations share this engine's lock
    /// window. On error the journal window is scanned in reverse and every
    /// key the transaction newly set is removed. The rollback is explicitly
    /// naive: pre-existing values overwritten by the transaction are NOT
    /// restored.
    pub async fn transaction<F, Fut, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(TransactionHandle) -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        self.check_alive()?;
        self.ready().await?;
        self.count(&self.inner.stats.transactions);

        let attempts = self.inner.config.lock.attempts.saturating_mul(2);
        self.acquire_lock(attempts).await;
        let window_start = self.inner.journal.len().unwrap_or(0);

        match f(TransactionHandle {
            engine: self.clone(),
        })
        .await
        {
            Ok(value) => {
                self.inner.lock.release();
                Ok(value)
            }
            Err(e) => {
                self.naive_rollback(window_start).await;
                self.count(&self.inner.stats.rollbacks);
                self.inner.lock.release();
                Err(e)
            }
        }
    }

    async fn naive_rollback(&self, window_start: usize) {
        let records = self.inner.journal.read_all().unwrap_or_default();
        if records.len() <= window_start {
            return;
        }
        let mut undone: HashSet<String> = HashSet::new();
        for record in records[window_start..].iter().rev() {
            let JournalRecord::SetBegin { key, .. } = record else {
                continue;
            };
            let Some(user_key) = self.inner.layout.user_key_of_marker(key) else {
                continue;
            };
            if undone.insert(user_key.clone()) {
                if let Err(e) = self.remove(&user_key).await {
                    tracing::debug!(key = %user_key, "naive rollback skipped: {}", e);
                }
            }
        }
    }

    // ── Export / import ──

    pub async fn export(&self, opts: ExportOptions) -> StoreResult<Snapshot> {
        self.ready().await?;
        let raws = scan_prefixed_keys(
            self.inner.store.as_ref(),
            &self.inner.layout.namespace_prefix(),
        )?;
        let mut data = BTreeMap::new();
        for raw in raws {
            if !opts.include_indexes
                && matches!(self.inner.layout.classify(&raw), Some(KeyKind::Index(_)))
            {
                continue;
            }
            if let Some(value) = self.inner.store.get(&raw)? {
                data.insert(raw, value);
            }
        }
        Ok(Snapshot {
            namespace: self.inner.config.namespace.clone(),
            prefix: self.inner.config.prefix.clone(),
            schema_version: self.inner.config.schema_version,
            include_indexes: opts.include_indexes,
            data: Some(data),
            exported_at: now_ms(),
        })
    }

    /// Write every snapshot entry back. Existing keys are skipped unless
    /// `overwrite`. Returns the number of entries written.
    pub async fn import(&self, snapshot: &Snapshot, opts: ImportOptions) -> StoreResult<usize> {
        self.check_alive()?;
        self.ready().await?;
        let Some(data) = &snapshot.data else {
            return Err(StoreError::InvalidSnapshot(
                "snapshot has no data section".into(),
            ));
        };

        self.acquire_lock(self.inner.config.lock.attempts).await;
        let mut written = 0;
        let result: StoreResult<()> = (|| {
            for (raw_key, raw_value) in data {
                if !opts.overwrite && self.inner.store.get(raw_key)?.is_some() {
                    continue;
                }
                self.inner.store.put(raw_key, raw_value)?;
                written += 1;
            }
            Ok(())
        })();

        match result {
            Ok(()) => {
                self.publish(BroadcastKind::Import, None);
                self.inner.lock.release();
                self.inner
                    .events
                    .emit(EngineEvent::Import { entries: written });
                Ok(written)
            }
            Err(e) => {
                self.inner.lock.release();
                Err(e)
            }
        }
    }

    // ── Migration ──

    /// Rewrite every item whose schema version differs from `target` through
    /// the adapter. The first adapter failure surfaces; items already
    /// rewritten are kept, the rest are skipped.
    pub async fn migrate(
        &self,
        target_version: u32,
        adapter: &dyn MigrationAdapter,
    ) -> StoreResult<MigrationReport> {
        self.check_alive()?;
        self.ready().await?;

        let raws = scan_prefixed_keys(
            self.inner.store.as_ref(),
            &self.inner.layout.namespace_prefix(),
        )?;
        let mut report = MigrationReport::default();
        for raw in raws {
            let Some(KeyKind::Meta(user_key)) = self.inner.layout.classify(&raw) else {
                continue;
            };
            let Ok(Some(meta)) = self.inner.meta.read(&user_key) else {
                continue;
            };
            report.scanned += 1;
            if meta.schema_version == target_version {
                continue;
            }
            let Some(value) = self.get_value(&user_key).await? else {
                continue;
            };
            let (new_meta, new_value) = adapter
                .up(&meta, value)
                .map_err(|e| StoreError::SchemaMigration(format!("{}: {}", user_key, e)))?;

            let opts = SetOptions {
                ttl_ms: meta.ttl_ms,
                compress: Some(meta.compressed),
                encrypt: Some(meta.encrypted),
                indexes: Vec::new(),
            };
            self.set(&user_key, &new_value, opts).await?;

            // Force the target version and re-file the adapter's index refs.
            if let Ok(Some(mut stored)) = self.inner.meta.read(&user_key) {
                stored.schema_version = target_version;
                stored.index_keys = new_meta.index_keys.clone();
                for r in &stored.index_keys {
                    self.inner.indexes.ensure(&r.index, &r.value, &user_key)?;
                }
                self.inner.meta.write(&user_key, &stored)?;
            }
            report.migrated += 1;
        }

        self.inner.events.emit(EngineEvent::Migrate {
            migrated: report.migrated,
        });
        Ok(report)
    }

    // ── Indexes ──

    pub async fn create_index(&self, name: &str) -> StoreResult<()> {
        self.check_alive()?;
        self.ready().await?;
        self.inner.indexes.create(name)
    }

    /// User keys filed under `field_value`, in insertion order.
    pub async fn query_index(&self, name: &str, field_value: &str) -> StoreResult<Vec<String>> {
        self.ready().await?;
        self.inner.indexes.query(name, field_value)
    }

    /// All field values the index has buckets for.
    pub async fn list_index(&self, name: &str) -> StoreResult<Vec<String>> {
        self.ready().await?;
        self.inner.indexes.list(name)
    }

    // ── Maintenance ──

    /// Sweep expired items through the remove pipeline and reclaim orphaned
    /// metadata/chunks. Returns the number of expired items removed.
    pub async fn vacuum(&self) -> StoreResult<usize> {
        self.check_alive()?;
        self.ready().await?;
        self.vacuum_sweep().await
    }

    /// Sweep body, shared by the public `vacuum` entry point and the
    /// background scheduler task spawned from `init_once`. Does not call
    /// `ready()` itself: the scheduler only ever runs after initialization
    /// has completed, and going through `ready()` there would make the
    /// background task's future type recursively depend on `init_once`'s.
    async fn vacuum_sweep(&self) -> StoreResult<usize> {
        let inner = &self.inner;

        let expired = vacuum::collect_expired(
            inner.store.as_ref(),
            &inner.layout,
            &inner.meta,
            now_ms(),
        )?;
        let mut removed = 0;
        for user_key in expired {
            if self.remove_inner(&user_key).await? {
                removed += 1;
            }
        }

        let orphans = vacuum::collect_orphans(inner.store.as_ref(), &inner.layout)?;
        let orphan_count = orphans.len();
        for raw in orphans {
            inner.store.delete(&raw)?;
        }
        if orphan_count > 0 {
            tracing::debug!(count = orphan_count, "reclaimed orphaned entries");
        }

        self.count(&inner.stats.vacuums);
        Ok(removed)
    }

    /// While the estimated namespace size exceeds the soft quota, remove one
    /// victim per iteration through the full remove pipeline.
    async fn maybe_evict(&self, just_written: Option<&str>) -> StoreResult<()> {
        let soft = self.inner.config.quota_soft_limit;
        if soft == 0 {
            return Ok(());
        }
        let mut iterations = 0;
        while iterations < MAX_EVICTIONS_PER_CALL {
            let estimated =
                eviction::estimate_namespace_bytes(self.inner.store.as_ref(), &self.inner.layout)?;
            if estimated <= soft {
                break;
            }
            let Some(victim) = eviction::select_victim(
                self.inner.store.as_ref(),
                &self.inner.layout,
                &self.inner.meta,
                self.inner.config.eviction_policy,
                just_written,
            )?
            else {
                break;
            };
            tracing::debug!(victim = %victim, estimated, soft, "quota exceeded, evicting");
            self.remove(&victim).await?;
            self.count(&self.inner.stats.evictions);
            iterations += 1;
        }
        Ok(())
    }

    /// Point-in-time health report. When diagnostics are disabled by config
    /// the store scans are skipped and the scan-derived fields read zero.
    pub async fn diagnostics(&self) -> StoreResult<DiagnosticsReport> {
        self.ready().await?;
        let (items, estimated_bytes, journal_records) = if self.inner.config.diagnostics {
            (
                self.list_keys().await?.len(),
                eviction::estimate_namespace_bytes(self.inner.store.as_ref(), &self.inner.layout)?,
                self.inner.journal.len()?,
            )
        } else {
            (0, 0, 0)
        };
        Ok(DiagnosticsReport {
            namespace: self.inner.config.namespace.clone(),
            prefix: self.inner.config.prefix.clone(),
            items,
            estimated_bytes,
            quota_soft_limit: self.inner.config.quota_soft_limit,
            quota_hard_limit: self.inner.config.quota_hard_limit,
            journal_records,
            lock_holder: self.inner.lock.peek().map(|rec| rec.owner_id),
            schema_version: self.inner.config.schema_version,
            compress: self.inner.config.compress,
            encrypt: self.inner.config.encrypt,
        })
    }

    // ── Internals ──

    fn check_alive(&self) -> StoreResult<()> {
        if self.inner.destroyed.load(Ordering::SeqCst) {
            return Err(StoreError::InstanceDestroyed);
        }
        Ok(())
    }

    /// Bump a counter unless metrics are disabled by configuration.
    fn count(&self, counter: &AtomicU64) {
        if self.inner.config.metrics {
            EngineStats::incr(counter);
        }
    }

    async fn acquire_lock(&self, attempts: u32) -> bool {
        let acquired = self
            .inner
            .lock
            .acquire(
                attempts,
                Duration::from_millis(self.inner.config.lock.base_delay_ms),
            )
            .await;
        if !acquired {
            self.count(&self.inner.stats.lock_failures);
            tracing::debug!(
                namespace = %self.inner.config.namespace,
                "lock unavailable, proceeding without it"
            );
        }
        acquired
    }

    fn publish(&self, kind: BroadcastKind, key: Option<String>) {
        if !self.inner.config.broadcast {
            return;
        }
        let Some(transport) = &self.inner.transport else {
            return;
        };
        let message = BroadcastMessage::new(kind, key, &self.inner.origin_id);
        if let Ok(text) = serde_json::to_string(&message) {
            transport.publish(&text);
            self.count(&self.inner.stats.broadcasts);
        }
    }

    fn handle_peer_message(&self, text: &str) {
        let Ok(message) = serde_json::from_str::<BroadcastMessage>(text) else {
            return;
        };
        if message.origin_id == self.inner.origin_id {
            return;
        }
        let event = match message.kind {
            BroadcastKind::Set => EngineEvent::RemoteSet {
                key: message.key.unwrap_or_default(),
            },
            BroadcastKind::Remove => EngineEvent::RemoteRemove {
                key: message.key.unwrap_or_default(),
            },
            BroadcastKind::Clear => EngineEvent::RemoteClear,
            BroadcastKind::Import => EngineEvent::RemoteImport,
        };
        self.inner.events.emit(event);
    }
}

/// The handle a transaction body operates through. Operations delegate to
/// the owning engine and therefore share its journal and lock.
pub struct TransactionHandle {
    engine: StorageEngine,
}

impl TransactionHandle {
    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        opts: SetOptions,
    ) -> StoreResult<bool> {
        self.engine.set(key, value, opts).await
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        self.engine.get(key).await
    }

    pub async fn get_value(&self, key: &str) -> StoreResult<Option<Value>> {
        self.engine.get_value(key).await
    }

    pub async fn remove(&self, key: &str) -> StoreResult<bool> {
        self.engine.remove(key).await
    }
}

/// Stringified form of a field value for index bucketing: strings keep their
/// content, everything else uses its JSON text.
fn stringify_field(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
