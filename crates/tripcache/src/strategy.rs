//! Named cache strategies
//!
//! A strategy bundles a TTL, a capacity cap, a compression flag and default
//! tags under a name, so callers pick `"search"` instead of repeating the
//! same options at every call site.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::Cache;
use crate::compression;
use crate::config::duration_ms;
use crate::entry::{Payload, SetOptions};
use crate::error::{BoxError, CacheError, Result};

/// TTL applied when a caller names a strategy that is not registered
pub const FALLBACK_TTL: Duration = Duration::from_secs(5 * 60);

/// Name of the strategy used for reference data and warmup writes
pub const STATIC: &str = "static";
/// Name of the strategy used for per-user data
pub const USER: &str = "user";
/// Name of the strategy used for fast-changing data
pub const DYNAMIC: &str = "dynamic";
/// Name of the strategy used for search results
pub const SEARCH: &str = "search";

/// A named bundle of write options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub name: String,
    #[serde(rename = "ttl_ms", with = "duration_ms")]
    pub ttl: Duration,
    /// Capacity cap applied when writing under this strategy
    #[serde(default)]
    pub max_size: Option<usize>,
    /// Whether values are stored compressed
    #[serde(default)]
    pub compress: bool,
    /// Tags merged onto every entry written under this strategy
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Strategy {
    pub fn new(name: impl Into<String>, ttl: Duration) -> Self {
        Self {
            name: name.into(),
            ttl,
            max_size: None,
            compress: false,
            tags: Vec::new(),
        }
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = Some(max_size);
        self
    }

    pub fn compressed(mut self) -> Self {
        self.compress = true;
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

    /// Long-lived reference data
    pub fn static_data() -> Self {
        Self::new(STATIC, Duration::from_secs(60 * 60))
            .with_max_size(1000)
            .compressed()
            .with_tags([STATIC])
    }

    /// Per-user data
    pub fn user_data() -> Self {
        Self::new(USER, Duration::from_secs(30 * 60))
            .with_max_size(500)
            .compressed()
            .with_tags([USER])
    }

    /// Short-lived, frequently changing data
    pub fn dynamic_data() -> Self {
        Self::new(DYNAMIC, Duration::from_secs(5 * 60))
            .with_max_size(200)
            .with_tags([DYNAMIC])
    }

    /// Search results
    pub fn search_results() -> Self {
        Self::new(SEARCH, Duration::from_secs(15 * 60))
            .with_max_size(100)
            .compressed()
            .with_tags([SEARCH])
    }

    /// The four strategies registered by [`StrategyManager::new`]
    pub fn predefined() -> Vec<Self> {
        vec![
            Self::static_data(),
            Self::user_data(),
            Self::dynamic_data(),
            Self::search_results(),
        ]
    }

    fn options(&self, ttl_override: Option<Duration>) -> SetOptions {
        SetOptions {
            ttl: Some(ttl_override.unwrap_or(self.ttl)),
            tags: self.tags.clone(),
            max_size: self.max_size,
        }
    }
}

/// Registry of strategies over a shared cache
pub struct StrategyManager {
    cache: Arc<Cache>,
    strategies: RwLock<HashMap<String, Strategy>>,
    fallback_ttl: Duration,
}

impl StrategyManager {
    /// Create a manager with the predefined strategies registered
    pub fn new(cache: Arc<Cache>) -> Self {
        let manager = Self::empty(cache);
        for strategy in Strategy::predefined() {
            manager.register(strategy);
        }
        manager
    }

    /// Create a manager with no strategies registered
    pub fn empty(cache: Arc<Cache>) -> Self {
        Self {
            cache,
            strategies: RwLock::new(HashMap::new()),
            fallback_ttl: FALLBACK_TTL,
        }
    }

    /// Override the TTL used for unknown strategy names
    pub fn with_fallback_ttl(mut self, ttl: Duration) -> Self {
        self.fallback_ttl = ttl;
        self
    }

    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    /// Register `strategy` under its name, replacing any previous one
    pub fn register(&self, strategy: Strategy) {
        debug!("Registered cache strategy: {}", strategy.name);
        self.strategies
            .write()
            .insert(strategy.name.clone(), strategy);
    }

    /// Look up a registered strategy
    pub fn strategy(&self, name: &str) -> Option<Strategy> {
        self.strategies.read().get(name).cloned()
    }

    /// Registered strategy names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.strategies.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Resolve a strategy by name, falling back to an uncompressed,
    /// untagged strategy with the fallback TTL
    pub fn resolve(&self, name: &str) -> Strategy {
        match self.strategy(name) {
            Some(strategy) => strategy,
            None => {
                let err = CacheError::UnknownStrategy {
                    name: name.to_string(),
                };
                warn!("{}; using fallback TTL {:?}", err, self.fallback_ttl);
                Strategy::new(name, self.fallback_ttl)
            }
        }
    }

    /// Read a value written under `strategy_name`.
    ///
    /// Compressed payloads are inflated whatever the strategy's current
    /// compression flag, since the stored variant records how it was written.
    pub fn get<T: DeserializeOwned>(&self, key: &str, strategy_name: &str) -> Result<Option<T>> {
        if self.strategy(strategy_name).is_none() {
            debug!("Reading {} under unknown strategy {}", key, strategy_name);
        }
        self.cache.get(key)
    }

    /// Write a value using the options of `strategy_name`
    pub fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        strategy_name: &str,
        ttl_override: Option<Duration>,
    ) -> Result<()> {
        let value = serde_json::to_value(value).map_err(|e| CacheError::Serialization {
            message: e.to_string(),
        })?;
        self.set_value(key, value, strategy_name, ttl_override);
        Ok(())
    }

    /// Write an untyped value using the options of `strategy_name`
    pub fn set_value(
        &self,
        key: &str,
        value: Value,
        strategy_name: &str,
        ttl_override: Option<Duration>,
    ) {
        let strategy = self.resolve(strategy_name);
        let payload = if strategy.compress {
            let payload = compression::compress(value);
            if payload.is_compressed() {
                self.cache
                    .analytics()
                    .record_compression(payload.bytes_saved());
            }
            payload
        } else {
            Payload::Raw(value)
        };

        self.cache
            .set_payload(key, payload, strategy.options(ttl_override));
    }

    /// Return the live value for `key` or fetch and store it under
    /// `strategy_name`
    pub async fn get_or_set<T, F, Fut, E>(
        &self,
        key: &str,
        strategy_name: &str,
        fetcher: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<BoxError>,
    {
        if let Some(value) = self.get::<T>(key, strategy_name)? {
            return Ok(value);
        }

        let value = fetcher()
            .await
            .map_err(|e| CacheError::fetcher(key, e))?;
        self.set(key, &value, strategy_name, None)?;
        Ok(value)
    }

    /// Remove every entry carrying one of the strategy's default tags
    pub fn invalidate_strategy(&self, strategy_name: &str) -> usize {
        let strategy = self.resolve(strategy_name);
        if strategy.tags.is_empty() {
            return 0;
        }
        self.cache.invalidate_by_tags(strategy.tags.as_slice())
    }
}
