//! Cache configuration
//!
//! Configuration is plain data fixed at construction time. It can be built in
//! code, loaded from a TOML, JSON or YAML file (format picked by extension),
//! and adjusted with `TRIPCACHE_*` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{CacheError, Result};
use crate::persistence::DEFAULT_NAMESPACE;

/// Prefix of environment variables that override configuration values
pub const ENV_PREFIX: &str = "TRIPCACHE_";

/// Serialize a `Duration` as integer milliseconds
pub mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Entry store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Soft cap on the number of entries
    pub max_size: usize,
    /// TTL used when a write does not specify one
    #[serde(rename = "default_ttl_ms", with = "duration_ms")]
    pub default_ttl: Duration,
    /// Period of the background expiry sweep
    #[serde(rename = "sweep_interval_ms", with = "duration_ms")]
    pub sweep_interval: Duration,
    /// Share of all entries evicted when over capacity
    pub eviction_ratio: f64,
    pub persistence: PersistenceConfig,
    pub warmup: WarmupConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            default_ttl: Duration::from_secs(5 * 60),
            sweep_interval: Duration::from_secs(60),
            eviction_ratio: 0.1,
            persistence: PersistenceConfig::default(),
            warmup: WarmupConfig::default(),
        }
    }
}

/// Durable persistence configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub enabled: bool,
    /// Directory for file persistence; in-memory persistence when unset
    pub directory: Option<PathBuf>,
    /// Prefix applied to every persisted record key
    pub namespace: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

/// Warmup scheduler configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarmupConfig {
    pub enabled: bool,
    /// Period of the high-priority run
    #[serde(rename = "high_priority_interval_ms", with = "duration_ms")]
    pub high_priority_interval: Duration,
    /// Period of the full run
    #[serde(rename = "full_interval_ms", with = "duration_ms")]
    pub full_interval: Duration,
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            high_priority_interval: Duration::from_secs(5 * 60),
            full_interval: Duration::from_secs(30 * 60),
        }
    }
}

impl CacheConfig {
    /// Load configuration from a file
    ///
    /// Supports TOML (.toml), JSON (.json) and YAML (.yaml, .yml).
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();

        let config: Self = match extension.as_str() {
            "toml" => Self::from_toml_str(&content)?,
            "json" => serde_json::from_str(&content).map_err(|e| CacheError::Deserialization {
                message: format!("{}: {}", path.display(), e),
            })?,
            "yaml" | "yml" => {
                serde_yaml::from_str(&content).map_err(|e| CacheError::Deserialization {
                    message: format!("{}: {}", path.display(), e),
                })?
            }
            other => {
                return Err(CacheError::config(
                    "path",
                    format!("unsupported config format '{}'", other),
                ))
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Parse TOML content
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| CacheError::Deserialization {
            message: e.to_string(),
        })
    }

    /// Apply `TRIPCACHE_*` overrides from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(std::env::vars());
    }

    /// Apply overrides from `(name, value)` pairs.
    ///
    /// Unknown names are ignored; unparseable values are logged and ignored.
    pub fn apply_overrides<I, K, V>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (name, value) in vars {
            let Some(field) = name.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.as_ref();
            match field {
                "MAX_SIZE" => set_parsed(&mut self.max_size, field, value),
                "DEFAULT_TTL_MS" => set_millis(&mut self.default_ttl, field, value),
                "SWEEP_INTERVAL_MS" => set_millis(&mut self.sweep_interval, field, value),
                "PERSISTENCE_ENABLED" => set_parsed(&mut self.persistence.enabled, field, value),
                "PERSISTENCE_DIR" => self.persistence.directory = Some(PathBuf::from(value)),
                _ => {}
            }
        }
    }

    /// Validate value ranges
    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(CacheError::config("max_size", "must be greater than zero"));
        }
        if !(self.eviction_ratio > 0.0 && self.eviction_ratio <= 1.0) {
            return Err(CacheError::config(
                "eviction_ratio",
                format!("{} is outside (0, 1]", self.eviction_ratio),
            ));
        }
        if self.sweep_interval.is_zero() {
            return Err(CacheError::config("sweep_interval", "must be non-zero"));
        }
        if self.warmup.high_priority_interval.is_zero() || self.warmup.full_interval.is_zero() {
            return Err(CacheError::config("warmup", "intervals must be non-zero"));
        }
        Ok(())
    }
}

fn set_parsed<T: std::str::FromStr>(target: &mut T, field: &str, value: &str) {
    match value.parse() {
        Ok(parsed) => *target = parsed,
        Err(_) => warn!("Ignoring invalid {}{}={}", ENV_PREFIX, field, value),
    }
}

fn set_millis(target: &mut Duration, field: &str, value: &str) {
    let mut millis = target.as_millis() as u64;
    set_parsed(&mut millis, field, value);
    *target = Duration::from_millis(millis);
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = CacheConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_size, 1000);
        assert_eq!(config.default_ttl, Duration::from_secs(300));
        assert_eq!(config.persistence.namespace, "tripcache:");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = CacheConfig::from_toml_str(
            r#"
            max_size = 50
            default_ttl_ms = 1000

            [warmup]
            full_interval_ms = 60000
            "#,
        )
        .unwrap();

        assert_eq!(config.max_size, 50);
        assert_eq!(config.default_ttl, Duration::from_secs(1));
        assert_eq!(config.warmup.full_interval, Duration::from_secs(60));
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
        assert!(config.persistence.enabled);
    }

    #[test]
    fn test_load_from_json_and_yaml_files() {
        let dir = TempDir::new().unwrap();

        let json_path = dir.path().join("cache.json");
        std::fs::write(&json_path, r#"{ "max_size": 12 }"#).unwrap();
        assert_eq!(CacheConfig::load_from_file(&json_path).unwrap().max_size, 12);

        let yaml_path = dir.path().join("cache.yaml");
        std::fs::write(&yaml_path, "max_size: 7\neviction_ratio: 0.5\n").unwrap();
        let config = CacheConfig::load_from_file(&yaml_path).unwrap();
        assert_eq!(config.max_size, 7);
        assert_eq!(config.eviction_ratio, 0.5);
    }

    #[test]
    fn test_load_rejects_unknown_extension_and_invalid_values() {
        let dir = TempDir::new().unwrap();

        let ini_path = dir.path().join("cache.ini");
        std::fs::write(&ini_path, "max_size=1").unwrap();
        assert!(matches!(
            CacheConfig::load_from_file(&ini_path),
            Err(CacheError::Config { .. })
        ));

        let toml_path = dir.path().join("cache.toml");
        std::fs::write(&toml_path, "max_size = 0").unwrap();
        assert!(matches!(
            CacheConfig::load_from_file(&toml_path),
            Err(CacheError::Config { .. })
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = CacheConfig::default();
        config.apply_overrides([
            ("TRIPCACHE_MAX_SIZE", "25"),
            ("TRIPCACHE_DEFAULT_TTL_MS", "1500"),
            ("TRIPCACHE_PERSISTENCE_ENABLED", "false"),
            ("TRIPCACHE_PERSISTENCE_DIR", "/var/cache/trips"),
            ("TRIPCACHE_SWEEP_INTERVAL_MS", "soon"),
            ("HOME", "/root"),
        ]);

        assert_eq!(config.max_size, 25);
        assert_eq!(config.default_ttl, Duration::from_millis(1500));
        assert!(!config.persistence.enabled);
        assert_eq!(
            config.persistence.directory,
            Some(PathBuf::from("/var/cache/trips"))
        );
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
    }
}
