//! Cache entries, payloads and write options

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;

use crate::compression;
use crate::error::Result;

/// Stored form of a cached value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Payload {
    /// Uncompressed JSON value
    Raw(Value),
    /// Gzipped JSON encoding of a value
    Compressed {
        #[serde(with = "base64_bytes")]
        bytes: Vec<u8>,
        /// Length of the JSON encoding before compression
        original_size: usize,
    },
}

impl Payload {
    /// Whether the payload is stored compressed
    pub fn is_compressed(&self) -> bool {
        matches!(self, Payload::Compressed { .. })
    }

    /// Bytes saved by compression, zero for raw payloads
    pub fn bytes_saved(&self) -> u64 {
        match self {
            Payload::Raw(_) => 0,
            Payload::Compressed {
                bytes,
                original_size,
            } => original_size.saturating_sub(bytes.len()) as u64,
        }
    }

    /// Decode into a JSON value, inflating compressed payloads
    pub fn into_value(self) -> Result<Value> {
        match self {
            Payload::Raw(value) => Ok(value),
            Payload::Compressed { bytes, .. } => compression::decompress(&bytes),
        }
    }

    /// Decode a clone of the payload into a JSON value
    pub fn to_value(&self) -> Result<Value> {
        match self {
            Payload::Raw(value) => Ok(value.clone()),
            Payload::Compressed { bytes, .. } => compression::decompress(bytes),
        }
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}

/// A single cache entry
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The cached data
    pub payload: Payload,
    /// Monotonic creation time, used for liveness
    pub created: Instant,
    /// Wall-clock creation time, used for persistence
    pub created_at: DateTime<Utc>,
    /// Time after creation at which the entry is logically absent
    pub ttl: Duration,
    /// Labels for bulk invalidation
    pub tags: BTreeSet<String>,
    pub(crate) last_accessed: Instant,
    pub(crate) access_seq: u64,
}

impl CacheEntry {
    /// Create a new cache entry created now
    pub fn new(payload: Payload, ttl: Duration, tags: BTreeSet<String>) -> Self {
        let created = Instant::now();
        Self {
            payload,
            created,
            created_at: Utc::now(),
            ttl,
            tags,
            last_accessed: created,
            access_seq: 0,
        }
    }

    /// Check whether the entry is live at `now`
    pub fn is_live_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created) <= self.ttl
    }

    /// Check if the entry has expired
    pub fn is_expired(&self) -> bool {
        !self.is_live_at(Instant::now())
    }

    /// Get remaining TTL, `None` once expired
    pub fn ttl_remaining(&self) -> Option<Duration> {
        let age = Instant::now().saturating_duration_since(self.created);
        self.ttl.checked_sub(age)
    }

    pub(crate) fn touch(&mut self, now: Instant, seq: u64) {
        self.last_accessed = now;
        self.access_seq = seq;
    }

    /// Eviction ordering key; smaller means evicted sooner
    pub(crate) fn recency(&self) -> (Instant, u64) {
        (self.last_accessed, self.access_seq)
    }
}

/// Options for writing an entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// TTL override; the cache default applies when unset
    pub ttl: Option<Duration>,
    /// Tags attached to the entry
    pub tags: Vec<String>,
    /// Soft cap for this write; exceeding it evicts a share of the least
    /// recently accessed entries without shrinking the store to the cap
    pub max_size: Option<usize>,
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = Some(max_size);
        self
    }
}
