//! Cache hit/miss analytics

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, SystemTime},
};

use serde::{Deserialize, Serialize};

/// Point-in-time copy of the cache analytics counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsSnapshot {
    /// Total number of cache hits
    pub hits: u64,
    /// Total number of cache misses
    pub misses: u64,
    /// Entries removed by capacity eviction
    pub evictions: u64,
    /// Entries removed because their TTL elapsed
    pub expirations: u64,
    /// Entries written in compressed form
    pub compressed_writes: u64,
    /// Estimated bytes saved by compression.
    ///
    /// Measured against the JSON encoding of each compressed value, so it
    /// approximates rather than measures the in-memory saving.
    pub bytes_saved: u64,
    /// Timestamp of collector creation
    pub created_at: SystemTime,
}

impl AnalyticsSnapshot {
    /// Hit rate as a fraction in `0.0..=1.0`, zero before any lookup
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Miss rate as a fraction in `0.0..=1.0`, zero before any lookup
    pub fn miss_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.misses as f64 / total as f64
        }
    }

    /// Get uptime since collector creation
    pub fn uptime(&self) -> Duration {
        SystemTime::now()
            .duration_since(self.created_at)
            .unwrap_or(Duration::from_secs(0))
    }
}

/// Thread-safe analytics collector shared by every cache access
#[derive(Debug, Clone)]
pub struct CacheAnalytics {
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
    evictions: Arc<AtomicU64>,
    expirations: Arc<AtomicU64>,
    compressed_writes: Arc<AtomicU64>,
    bytes_saved: Arc<AtomicU64>,
    created_at: SystemTime,
}

impl CacheAnalytics {
    pub fn new() -> Self {
        Self {
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
            evictions: Arc::new(AtomicU64::new(0)),
            expirations: Arc::new(AtomicU64::new(0)),
            compressed_writes: Arc::new(AtomicU64::new(0)),
            bytes_saved: Arc::new(AtomicU64::new(0)),
            created_at: SystemTime::now(),
        }
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, count: usize) {
        self.evictions.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_expirations(&self, count: usize) {
        self.expirations.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Record a compressed write and the bytes it is estimated to save
    pub fn record_compression(&self, bytes_saved: u64) {
        self.compressed_writes.fetch_add(1, Ordering::Relaxed);
        self.bytes_saved.fetch_add(bytes_saved, Ordering::Relaxed);
    }

    /// Current hit rate, see [`AnalyticsSnapshot::hit_rate`]
    pub fn hit_rate(&self) -> f64 {
        self.snapshot().hit_rate()
    }

    /// Get current statistics snapshot
    pub fn snapshot(&self) -> AnalyticsSnapshot {
        AnalyticsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            compressed_writes: self.compressed_writes.load(Ordering::Relaxed),
            bytes_saved: self.bytes_saved.load(Ordering::Relaxed),
            created_at: self.created_at,
        }
    }

    /// Reset all counters
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.expirations.store(0, Ordering::Relaxed);
        self.compressed_writes.store(0, Ordering::Relaxed);
        self.bytes_saved.store(0, Ordering::Relaxed);
    }

    /// Get a formatted summary of cache analytics
    pub fn summary(&self) -> String {
        let stats = self.snapshot();
        format!(
            "Cache Analytics:\n  Hits: {}\n  Misses: {}\n  Hit Rate: {:.2}%\n  Evictions: {}\n  Expirations: {}\n  Compressed Writes: {}\n  Estimated Bytes Saved: {}",
            stats.hits,
            stats.misses,
            stats.hit_rate() * 100.0,
            stats.evictions,
            stats.expirations,
            stats.compressed_writes,
            stats.bytes_saved
        )
    }
}

impl Default for CacheAnalytics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate_is_zero_without_lookups() {
        let analytics = CacheAnalytics::new();
        assert_eq!(analytics.hit_rate(), 0.0);
        assert_eq!(analytics.snapshot().miss_rate(), 0.0);
    }

    #[test]
    fn test_hit_rate_fraction() {
        let analytics = CacheAnalytics::new();
        for _ in 0..3 {
            analytics.record_hit();
        }
        analytics.record_miss();

        let stats = analytics.snapshot();
        assert_eq!(stats.hits, 3);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate(), 0.75);
        assert_eq!(stats.miss_rate(), 0.25);
    }

    #[test]
    fn test_record_compression_accumulates() {
        let analytics = CacheAnalytics::new();
        analytics.record_compression(100);
        analytics.record_compression(50);

        let stats = analytics.snapshot();
        assert_eq!(stats.compressed_writes, 2);
        assert_eq!(stats.bytes_saved, 150);
    }

    #[test]
    fn test_clones_share_counters() {
        let analytics = CacheAnalytics::new();
        let observer = analytics.clone();
        analytics.record_hit();
        analytics.record_evictions(4);

        let stats = observer.snapshot();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.evictions, 4);

        observer.reset();
        assert_eq!(analytics.snapshot().hits, 0);
    }

    #[test]
    fn test_summary_mentions_hit_rate() {
        let analytics = CacheAnalytics::new();
        analytics.record_hit();
        analytics.record_miss();
        assert!(analytics.summary().contains("Hit Rate: 50.00%"));
    }
}
