//! Durable backing stores used to rehydrate the cache across restarts

use std::{
    collections::{BTreeSet, HashMap},
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::duration_ms;
use crate::entry::{CacheEntry, Payload};
use crate::time::{instant_to_wall, wall_age, wall_to_instant};
use crate::{CacheError, Result};

/// Default prefix applied to every persisted record key
pub const DEFAULT_NAMESPACE: &str = "tripcache:";

/// Persisted form of a cache entry.
///
/// Unknown fields are ignored on load so newer writers stay readable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedEntry {
    pub key: String,
    pub data: Payload,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "ttl_ms", with = "duration_ms")]
    pub ttl: Duration,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl PersistedEntry {
    /// Snapshot an in-memory entry for persistence
    pub fn from_entry(key: &str, entry: &CacheEntry) -> Self {
        Self {
            key: key.to_string(),
            data: entry.payload.clone(),
            created_at: instant_to_wall(entry.created),
            ttl: entry.ttl,
            tags: entry.tags.iter().cloned().collect(),
        }
    }

    /// Whether the record's TTL has elapsed in wall-clock time
    pub fn is_expired(&self) -> bool {
        wall_age(self.created_at) > self.ttl
    }

    /// Rebuild the in-memory entry, `None` if already expired
    pub fn into_entry(self) -> Option<(String, CacheEntry)> {
        if self.is_expired() {
            return None;
        }
        let created = wall_to_instant(self.created_at);
        let tags: BTreeSet<String> = self.tags.into_iter().collect();
        let mut entry = CacheEntry::new(self.data, self.ttl, tags);
        entry.created = created;
        entry.created_at = self.created_at;
        entry.last_accessed = created;
        Some((self.key, entry))
    }
}

/// Durable key-value store mirroring the cache.
///
/// Every operation is best effort. The cache logs failures and keeps working
/// in memory; none of them is propagated to cache callers.
pub trait PersistenceAdapter: Send + Sync {
    /// Write or overwrite the record for `key`
    fn save(&self, key: &str, entry: &PersistedEntry) -> Result<()>;

    /// Load every readable record.
    ///
    /// Records that fail to parse are skipped and removed where possible; a
    /// corrupt record never aborts loading the rest.
    fn load_all(&self) -> Result<Vec<PersistedEntry>>;

    /// Remove the record for `key`, if any
    fn remove(&self, key: &str) -> Result<()>;

    /// Remove every record in this adapter's namespace
    fn clear(&self) -> Result<()>;

    /// Get adapter name for debugging
    fn name(&self) -> &str;
}

/// Adapter that persists nothing, for tests and headless environments
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPersistence;

impl PersistenceAdapter for NoopPersistence {
    fn save(&self, _key: &str, _entry: &PersistedEntry) -> Result<()> {
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<PersistedEntry>> {
        Ok(Vec::new())
    }

    fn remove(&self, _key: &str) -> Result<()> {
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "noop"
    }
}

/// Process-local string store holding serialized records.
///
/// Clones share the same records, so a second cache built over a clone sees
/// what the first one wrote, which is how restarts are exercised in tests.
#[derive(Debug, Clone)]
pub struct MemoryPersistence {
    namespace: String,
    records: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::with_namespace(DEFAULT_NAMESPACE)
    }

    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn record_key(&self, key: &str) -> String {
        format!("{}{}", self.namespace, key)
    }

    /// Store a raw record string under `key`, bypassing serialization
    pub fn insert_raw(&self, key: &str, raw: impl Into<String>) {
        let record_key = self.record_key(key);
        self.records.write().insert(record_key, raw.into());
    }

    /// Whether a record exists for `key`
    pub fn contains(&self, key: &str) -> bool {
        self.records.read().contains_key(&self.record_key(key))
    }

    /// Number of records in this namespace
    pub fn len(&self) -> usize {
        self.records
            .read()
            .keys()
            .filter(|k| k.starts_with(&self.namespace))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

impl PersistenceAdapter for MemoryPersistence {
    fn save(&self, key: &str, entry: &PersistedEntry) -> Result<()> {
        let raw = serde_json::to_string(entry).map_err(|e| CacheError::Serialization {
            message: e.to_string(),
        })?;
        self.records.write().insert(self.record_key(key), raw);
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<PersistedEntry>> {
        let mut records = self.records.write();
        let mut loaded = Vec::new();
        let mut corrupt = Vec::new();

        for (record_key, raw) in records.iter() {
            if !record_key.starts_with(&self.namespace) {
                continue;
            }
            match serde_json::from_str::<PersistedEntry>(raw) {
                Ok(entry) => loaded.push(entry),
                Err(e) => {
                    warn!("Dropping unreadable cache record {}: {}", record_key, e);
                    corrupt.push(record_key.clone());
                }
            }
        }

        for record_key in corrupt {
            records.remove(&record_key);
        }

        Ok(loaded)
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.records.write().remove(&self.record_key(key));
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let namespace = &self.namespace;
        self.records.write().retain(|k, _| !k.starts_with(namespace));
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// File-backed store writing one JSON file per key.
///
/// File names are the namespace followed by the SHA-256 of the key, so keys
/// with path separators or very long keys map to valid, distinct files. The
/// key itself is stored inside the record.
pub struct FilePersistence {
    base_path: PathBuf,
    file_prefix: String,
}

impl FilePersistence {
    /// Create file persistence rooted at `base_path`.
    ///
    /// Fails with [`CacheError::StorageUnavailable`] when the directory cannot
    /// be created.
    pub fn new<P: AsRef<Path>>(base_path: P) -> Result<Self> {
        Self::with_namespace(base_path, DEFAULT_NAMESPACE)
    }

    pub fn with_namespace<P: AsRef<Path>>(base_path: P, namespace: &str) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        if !base_path.exists() {
            fs::create_dir_all(&base_path).map_err(|e| CacheError::StorageUnavailable {
                message: format!("cannot create {}: {}", base_path.display(), e),
            })?;
            debug!("Created cache persistence directory: {}", base_path.display());
        }

        // Sanitize namespace for filesystem
        let file_prefix =
            namespace.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_");

        Ok(Self {
            base_path,
            file_prefix,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Get file path for a key
    fn key_path(&self, key: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(key.as_bytes()));
        self.base_path
            .join(format!("{}{}.json", self.file_prefix, digest))
    }

    fn is_record_file(&self, path: &Path) -> bool {
        let is_json = path.extension().map_or(false, |ext| ext == "json");
        let in_namespace = path
            .file_name()
            .and_then(|name| name.to_str())
            .map_or(false, |name| name.starts_with(&self.file_prefix));
        is_json && in_namespace
    }

    fn record_files(&self) -> Result<Vec<PathBuf>> {
        if !self.base_path.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for dir_entry in fs::read_dir(&self.base_path)? {
            let path = dir_entry?.path();
            if self.is_record_file(&path) {
                files.push(path);
            }
        }
        Ok(files)
    }
}

impl PersistenceAdapter for FilePersistence {
    fn save(&self, key: &str, entry: &PersistedEntry) -> Result<()> {
        let json = serde_json::to_string(entry).map_err(|e| CacheError::Serialization {
            message: e.to_string(),
        })?;
        fs::write(self.key_path(key), json)?;
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<PersistedEntry>> {
        let mut loaded = Vec::new();

        for path in self.record_files()? {
            let parsed = fs::read_to_string(&path)
                .map_err(CacheError::from)
                .and_then(|content| {
                    serde_json::from_str::<PersistedEntry>(&content).map_err(|e| {
                        CacheError::Deserialization {
                            message: e.to_string(),
                        }
                    })
                });

            match parsed {
                Ok(entry) => loaded.push(entry),
                Err(e) => {
                    warn!("Dropping unreadable cache record {}: {}", path.display(), e);
                    let _ = fs::remove_file(&path);
                }
            }
        }

        Ok(loaded)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let file_path = self.key_path(key);
        if file_path.exists() {
            fs::remove_file(&file_path)?;
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        for path in self.record_files()? {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "file"
    }
}
