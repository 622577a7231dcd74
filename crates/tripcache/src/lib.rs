//! # Tripcache
//!
//! In-process caching engine for trip planning services, with expiring
//! entries, least-recently-used eviction, tag invalidation and best-effort
//! persistence across restarts.
//!
//! ## Features
//!
//! - **Entry store**: per-entry TTL and a size bound enforced by LRU eviction
//! - **Tag invalidation**: drop every entry carrying any of a set of tags
//! - **Persistence**: entries mirrored to a pluggable store and reloaded on build
//! - **Strategies**: named presets for TTL, tags and compression
//! - **Warmup**: prioritized background refresh of known keys
//! - **Analytics**: hit, miss, eviction and compression counters
//!
//! ## Example
//!
//! ```no_run
//! use std::time::Duration;
//! use tripcache::{Cache, SetOptions};
//!
//! # fn main() -> tripcache::Result<()> {
//! let cache = Cache::builder().build()?;
//! cache.set(
//!     "trips:1",
//!     &vec!["Lisbon", "Porto"],
//!     SetOptions::new().with_ttl(Duration::from_secs(60)).with_tags(["trips"]),
//! )?;
//! let trip: Option<Vec<String>> = cache.get("trips:1")?;
//! assert!(trip.is_some());
//! # Ok(())
//! # }
//! ```

pub mod analytics;
pub mod cache;
pub mod compression;
pub mod config;
pub mod entry;
pub mod error;
pub mod persistence;
pub mod strategy;
pub mod tags;
pub mod task;
pub mod time;
pub mod warmup;

pub use analytics::{AnalyticsSnapshot, CacheAnalytics};
pub use cache::{Cache, CacheBuilder, CacheStats};
pub use config::{CacheConfig, PersistenceConfig, WarmupConfig};
pub use entry::{CacheEntry, Payload, SetOptions};
pub use error::{BoxError, CacheError, Result};
pub use persistence::{
    FilePersistence, MemoryPersistence, NoopPersistence, PersistedEntry, PersistenceAdapter,
};
pub use strategy::{Strategy, StrategyManager};
pub use tags::TagIndex;
pub use task::RepeatingTask;
pub use warmup::{Priority, WarmupJob, WarmupReport, WarmupScheduler};
