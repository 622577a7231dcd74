//! Entry store: expiring, capacity-bounded, tag-invalidated key-value cache

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::analytics::CacheAnalytics;
use crate::config::CacheConfig;
use crate::entry::{CacheEntry, Payload, SetOptions};
use crate::error::{BoxError, CacheError, Result};
use crate::persistence::{
    FilePersistence, MemoryPersistence, NoopPersistence, PersistedEntry, PersistenceAdapter,
};
use crate::tags::TagIndex;
use crate::task::RepeatingTask;

/// Cache statistics returned by [`Cache::stats`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Live entries; expired ones are swept before counting
    pub size: usize,
    pub max_size: usize,
    /// Hits over lookups, zero before any lookup
    pub hit_rate: f64,
    /// Live keys, sorted
    pub keys: Vec<String>,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    /// Estimated bytes saved by compression
    pub bytes_saved: u64,
}

enum Lookup {
    Hit(Payload),
    Expired,
    Missing,
}

#[derive(Default)]
struct StoreState {
    entries: HashMap<String, CacheEntry>,
    tags: TagIndex,
    next_seq: u64,
}

impl StoreState {
    fn bump_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn insert(&mut self, key: &str, mut entry: CacheEntry) {
        let seq = self.bump_seq();
        entry.access_seq = seq;
        self.tags.insert(key, &entry.tags);
        if let Some(previous) = self.entries.insert(key.to_string(), entry) {
            let current = &self.entries[key].tags;
            let stale: BTreeSet<String> = previous.tags.difference(current).cloned().collect();
            self.tags.remove(key, &stale);
        }
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.tags.remove(key, &entry.tags);
        Some(entry)
    }

    fn lookup(&mut self, key: &str, now: Instant) -> Lookup {
        let live = match self.entries.get(key) {
            Some(entry) => entry.is_live_at(now),
            None => return Lookup::Missing,
        };
        if !live {
            self.remove(key);
            return Lookup::Expired;
        }

        let seq = self.bump_seq();
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.touch(now, seq);
                Lookup::Hit(entry.payload.clone())
            }
            None => Lookup::Missing,
        }
    }

    fn purge_expired(&mut self, now: Instant) -> Vec<String> {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_live_at(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        expired
    }

    /// Remove the `count` least recently accessed entries other than `protect`
    fn evict_lru(&mut self, count: usize, protect: Option<&str>) -> Vec<String> {
        let mut candidates: Vec<(Instant, u64, String)> = self
            .entries
            .iter()
            .filter(|(key, _)| Some(key.as_str()) != protect)
            .map(|(key, entry)| {
                let (at, seq) = entry.recency();
                (at, seq, key.clone())
            })
            .collect();
        candidates.sort();

        let victims: Vec<String> = candidates
            .into_iter()
            .take(count)
            .map(|(_, _, key)| key)
            .collect();
        for key in &victims {
            self.remove(key);
        }
        victims
    }
}

/// In-process cache instance.
///
/// Synchronous operations never suspend; fetchers passed to
/// [`get_or_set`](Cache::get_or_set) and [`prefetch`](Cache::prefetch) may,
/// and other callers can use the cache meanwhile. Concurrent `get_or_set`
/// calls for the same missing key each run their fetcher; no in-flight
/// de-duplication is performed.
pub struct Cache {
    config: CacheConfig,
    state: Mutex<StoreState>,
    persistence: Arc<dyn PersistenceAdapter>,
    persistence_available: AtomicBool,
    analytics: CacheAnalytics,
    sweeper: Mutex<Option<RepeatingTask>>,
}

impl Cache {
    /// Create a cache from configuration, rehydrating from its persistence
    pub fn new(config: CacheConfig) -> Result<Self> {
        CacheBuilder::new().config(config).build()
    }

    pub fn builder() -> CacheBuilder {
        CacheBuilder::new()
    }

    /// Get cache configuration
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Get the analytics collector
    pub fn analytics(&self) -> &CacheAnalytics {
        &self.analytics
    }

    /// Whether writes are still mirrored to the persistence backend
    pub fn persistence_available(&self) -> bool {
        self.persistence_available.load(Ordering::Relaxed)
    }

    /// Store a value
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, opts: SetOptions) -> Result<()> {
        let value = serde_json::to_value(value).map_err(|e| CacheError::Serialization {
            message: e.to_string(),
        })?;
        self.set_payload(key, Payload::Raw(value), opts);
        Ok(())
    }

    /// Store an already-encoded payload.
    ///
    /// Inserts or overwrites `key`, mirrors it to persistence and, when the
    /// entry count exceeds the store capacity or the write's soft cap, evicts
    /// expired entries and then the least recently accessed ones. The written
    /// key is never evicted.
    ///
    /// Persistence is mirrored while the store lock is held, so concurrent
    /// writers to one key leave the persisted record matching memory.
    pub fn set_payload(&self, key: &str, payload: Payload, opts: SetOptions) {
        let ttl = opts.ttl.unwrap_or(self.config.default_ttl);
        let tags: BTreeSet<String> = opts.tags.into_iter().collect();
        let entry = CacheEntry::new(payload, ttl, tags);
        let record = PersistedEntry::from_entry(key, &entry);

        let mut state = self.state.lock();
        state.insert(key, entry);
        let removed = self.enforce_capacity(&mut state, opts.max_size, Some(key));

        self.persist(key, &record);
        for removed_key in &removed {
            self.unpersist(removed_key);
        }
        drop(state);
        debug!("Cached value for key: {}", key);
    }

    /// Retrieve a live value
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get_value(key) {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| CacheError::Deserialization {
                    message: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    /// Retrieve a live value as untyped JSON.
    ///
    /// A payload that cannot be decoded is dropped and reported as a miss.
    pub fn get_value(&self, key: &str) -> Option<Value> {
        let payload = self.get_payload(key)?;
        match payload.into_value() {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Dropping undecodable cache entry {}: {}", key, e);
                self.delete(key);
                None
            }
        }
    }

    /// Retrieve a copy of the stored payload without decoding it
    pub fn get_payload(&self, key: &str) -> Option<Payload> {
        let lookup = {
            let mut state = self.state.lock();
            let lookup = state.lookup(key, Instant::now());
            if matches!(lookup, Lookup::Expired) {
                self.unpersist(key);
            }
            lookup
        };
        match lookup {
            Lookup::Hit(payload) => {
                self.analytics.record_hit();
                debug!("Cache hit for key: {}", key);
                Some(payload)
            }
            Lookup::Expired => {
                self.analytics.record_miss();
                self.analytics.record_expirations(1);
                debug!("Cache expired for key: {}", key);
                None
            }
            Lookup::Missing => {
                self.analytics.record_miss();
                debug!("Cache miss for key: {}", key);
                None
            }
        }
    }

    /// Check if a live entry exists for `key`, removing it if stale
    pub fn has(&self, key: &str) -> bool {
        let now = Instant::now();
        {
            let mut state = self.state.lock();
            match state.entries.get(key).map(|entry| entry.is_live_at(now)) {
                Some(true) => return true,
                Some(false) => {
                    state.remove(key);
                    self.unpersist(key);
                }
                None => return false,
            }
        }
        self.analytics.record_expirations(1);
        false
    }

    /// Remove `key`; returns whether an entry was removed
    pub fn delete(&self, key: &str) -> bool {
        let mut state = self.state.lock();
        let removed = state.remove(key).is_some();
        self.unpersist(key);
        removed
    }

    /// Remove every entry, including persisted ones
    pub fn clear(&self) {
        {
            let mut state = self.state.lock();
            state.entries.clear();
            state.tags.clear();
            if self.persistence_available() {
                if let Err(e) = self.persistence.clear() {
                    self.handle_persistence_error("clear", "*", e);
                }
            }
        }
        debug!("Cleared cache");
    }

    /// Remove every entry carrying at least one of `tags`.
    ///
    /// Returns the number of entries removed.
    pub fn invalidate_by_tags<S: AsRef<str>>(&self, tags: &[S]) -> usize {
        let removed: Vec<String> = {
            let mut state = self.state.lock();
            let keys = state.tags.keys_for(tags);
            let removed: Vec<String> = keys
                .into_iter()
                .filter(|key| state.remove(key).is_some())
                .collect();
            for key in &removed {
                self.unpersist(key);
            }
            removed
        };
        debug!("Invalidated {} entries by tags", removed.len());
        removed.len()
    }

    /// Return the live value for `key`, or fetch, store and return it.
    ///
    /// A failing fetcher propagates as [`CacheError::Fetcher`] and nothing is
    /// written.
    pub async fn get_or_set<T, F, Fut, E>(&self, key: &str, fetcher: F, opts: SetOptions) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<BoxError>,
    {
        if let Some(value) = self.get::<T>(key)? {
            return Ok(value);
        }

        let value = fetcher()
            .await
            .map_err(|e| CacheError::fetcher(key, e))?;
        self.set(key, &value, opts)?;
        Ok(value)
    }

    /// Populate `key` ahead of use unless it is already live.
    ///
    /// Fetcher and storage failures are logged, never returned.
    pub async fn prefetch<T, F, Fut, E>(&self, key: &str, fetcher: F, opts: SetOptions)
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<BoxError>,
    {
        if self.has(key) {
            return;
        }

        match fetcher().await {
            Ok(value) => {
                if let Err(e) = self.set(key, &value, opts) {
                    warn!("Prefetch for {} could not store value: {}", key, e);
                }
            }
            Err(e) => {
                let err = CacheError::fetcher(key, e);
                warn!("Prefetch failed: {}", err);
            }
        }
    }

    /// Remove every expired entry; returns the number removed
    pub fn sweep_expired(&self) -> usize {
        let expired = {
            let mut state = self.state.lock();
            let expired = state.purge_expired(Instant::now());
            for key in &expired {
                self.unpersist(key);
            }
            expired
        };
        if !expired.is_empty() {
            self.analytics.record_expirations(expired.len());
            debug!("Swept {} expired entries", expired.len());
        }
        expired.len()
    }

    /// Start the periodic expiry sweep.
    ///
    /// The sweeper holds only a weak reference and ends once the cache is
    /// dropped. Calling this again replaces the running sweeper.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn start_sweeper(self: &Arc<Self>) {
        let cache = Arc::downgrade(self);
        let task = RepeatingTask::spawn("cache-sweeper", self.config.sweep_interval, move || {
            let cache = cache.clone();
            async move {
                match cache.upgrade() {
                    Some(cache) => {
                        cache.sweep_expired();
                        ControlFlow::Continue(())
                    }
                    None => ControlFlow::Break(()),
                }
            }
        });
        *self.sweeper.lock() = Some(task);
    }

    /// Whether the periodic sweep is running
    pub fn sweeper_running(&self) -> bool {
        self.sweeper
            .lock()
            .as_ref()
            .map_or(false, RepeatingTask::is_running)
    }

    /// Stop background work owned by this cache
    pub async fn shutdown(&self) {
        let sweeper = self.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            sweeper.stop().await;
            info!("Cache sweeper stopped");
        }
    }

    /// Get cache statistics.
    ///
    /// Expired entries are swept first so `size` and `keys` cover live
    /// entries only.
    pub fn stats(&self) -> CacheStats {
        self.sweep_expired();
        let analytics = self.analytics.snapshot();
        let mut keys: Vec<String> = self.state.lock().entries.keys().cloned().collect();
        keys.sort();

        CacheStats {
            size: keys.len(),
            max_size: self.config.max_size,
            hit_rate: analytics.hit_rate(),
            keys,
            hits: analytics.hits,
            misses: analytics.misses,
            evictions: analytics.evictions,
            expirations: analytics.expirations,
            bytes_saved: analytics.bytes_saved,
        }
    }

    /// Get number of entries held, including unswept expired ones
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evict entries once the store exceeds its capacity or `soft_cap`.
    ///
    /// Expired entries go first. If still over a limit, the least recently
    /// accessed entries are evicted: `eviction_ratio` of all entries and at
    /// least one. Only the store's own `max_size` also forces evicting down
    /// to that size; a soft cap from a strategy never shrinks the shared
    /// store to the cap.
    fn enforce_capacity(
        &self,
        state: &mut StoreState,
        soft_cap: Option<usize>,
        protect: Option<&str>,
    ) -> Vec<String> {
        let store_cap = self.config.max_size;
        let limit = soft_cap.map_or(store_cap, |cap| cap.min(store_cap));
        if state.entries.len() <= limit {
            return Vec::new();
        }

        let mut removed = state.purge_expired(Instant::now());
        self.analytics.record_expirations(removed.len());

        let len = state.entries.len();
        if len > limit {
            let by_ratio = (len as f64 * self.config.eviction_ratio).floor() as usize;
            let count = by_ratio.max(len.saturating_sub(store_cap)).max(1);
            let evicted = state.evict_lru(count, protect);
            self.analytics.record_evictions(evicted.len());
            debug!("Evicted {} least recently used entries", evicted.len());
            removed.extend(evicted);
        }
        removed
    }

    fn persist(&self, key: &str, record: &PersistedEntry) {
        if !self.persistence_available() {
            return;
        }
        if let Err(e) = self.persistence.save(key, record) {
            self.handle_persistence_error("save", key, e);
        }
    }

    fn unpersist(&self, key: &str) {
        if !self.persistence_available() {
            return;
        }
        if let Err(e) = self.persistence.remove(key) {
            self.handle_persistence_error("remove", key, e);
        }
    }

    fn handle_persistence_error(&self, operation: &str, key: &str, error: CacheError) {
        if error.is_storage_unavailable() {
            if self.persistence_available.swap(false, Ordering::Relaxed) {
                warn!(
                    "Persistence backend '{}' unavailable, continuing in memory only: {}",
                    self.persistence.name(),
                    error
                );
            }
        } else {
            warn!("Failed to {} persisted entry {}: {}", operation, key, error);
        }
    }

    /// Load live persisted entries, discarding expired records
    fn rehydrate(&self) {
        let records = match self.persistence.load_all() {
            Ok(records) => records,
            Err(e) => {
                self.handle_persistence_error("load", "*", e);
                return;
            }
        };

        let mut live: Vec<(String, CacheEntry)> = Vec::with_capacity(records.len());
        let mut stale = Vec::new();
        for record in records {
            let key = record.key.clone();
            match record.into_entry() {
                Some(loaded) => live.push(loaded),
                None => stale.push(key),
            }
        }

        for key in &stale {
            debug!("Discarding expired persisted entry: {}", key);
            self.unpersist(key);
        }

        live.sort_by(|a, b| a.1.created_at.cmp(&b.1.created_at));
        let loaded = live.len();
        let removed = {
            let mut state = self.state.lock();
            for (key, entry) in live {
                state.insert(&key, entry);
            }
            let removed = self.enforce_capacity(&mut state, None, None);
            for key in &removed {
                self.unpersist(key);
            }
            removed
        };

        if loaded > 0 || !stale.is_empty() {
            info!(
                "Rehydrated {} cache entries from '{}' ({} expired discarded, {} over capacity)",
                loaded,
                self.persistence.name(),
                stale.len(),
                removed.len()
            );
        }
    }
}

/// Builder pattern for cache construction
pub struct CacheBuilder {
    config: CacheConfig,
    persistence: Option<Arc<dyn PersistenceAdapter>>,
    analytics: Option<CacheAnalytics>,
}

impl CacheBuilder {
    /// Create a new cache builder
    pub fn new() -> Self {
        Self {
            config: CacheConfig::default(),
            persistence: None,
            analytics: None,
        }
    }

    /// Set cache configuration
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Use an explicit persistence adapter instead of the configured one
    pub fn persistence(mut self, persistence: Arc<dyn PersistenceAdapter>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Share an existing analytics collector
    pub fn analytics(mut self, analytics: CacheAnalytics) -> Self {
        self.analytics = Some(analytics);
        self
    }

    /// Build the cache and rehydrate it from persistence
    pub fn build(self) -> Result<Cache> {
        self.config.validate()?;

        let persistence = match self.persistence {
            Some(persistence) => persistence,
            None => Self::configured_persistence(&self.config),
        };

        let cache = Cache {
            config: self.config,
            state: Mutex::new(StoreState::default()),
            persistence,
            persistence_available: AtomicBool::new(true),
            analytics: self.analytics.unwrap_or_default(),
            sweeper: Mutex::new(None),
        };
        cache.rehydrate();
        Ok(cache)
    }

    fn configured_persistence(config: &CacheConfig) -> Arc<dyn PersistenceAdapter> {
        let persistence = &config.persistence;
        if !persistence.enabled {
            return Arc::new(NoopPersistence);
        }
        match &persistence.directory {
            Some(dir) => match FilePersistence::with_namespace(dir, &persistence.namespace) {
                Ok(files) => Arc::new(files),
                Err(e) => {
                    warn!("Cache persistence disabled, continuing in memory only: {}", e);
                    Arc::new(NoopPersistence)
                }
            },
            None => Arc::new(MemoryPersistence::with_namespace(persistence.namespace.clone())),
        }
    }
}

impl Default for CacheBuilder {
    fn default() -> Self {
        Self::new()
    }
}
