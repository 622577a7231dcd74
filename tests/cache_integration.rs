//! End-to-end cache workflows
//!
//! Covers expiry, strategy writes with compression, warmup ordering,
//! tag invalidation and reloading entries across a restart.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tempfile::TempDir;
use tripcache::{
    Cache, CacheConfig, CacheError, FilePersistence, MemoryPersistence, Payload, PersistedEntry,
    PersistenceAdapter, PersistenceConfig, Priority, SetOptions, StrategyManager, WarmupConfig,
    WarmupJob, WarmupScheduler,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Trip {
    id: u32,
    destination: String,
    nights: u8,
}

fn trip(id: u32, destination: &str) -> Trip {
    Trip {
        id,
        destination: destination.to_string(),
        nights: 3,
    }
}

fn cache_over(persistence: &MemoryPersistence) -> Cache {
    Cache::builder()
        .persistence(Arc::new(persistence.clone()))
        .build()
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_entry_expires_after_ttl() {
    let cache = cache_over(&MemoryPersistence::new());
    cache
        .set(
            "trips:1",
            &trip(1, "Lisbon"),
            SetOptions::new().with_ttl(Duration::from_millis(1000)),
        )
        .unwrap();

    tokio::time::advance(Duration::from_millis(500)).await;
    assert_eq!(cache.get::<Trip>("trips:1").unwrap(), Some(trip(1, "Lisbon")));

    // Reads do not extend the lifetime
    tokio::time::advance(Duration::from_millis(501)).await;
    assert_eq!(cache.get::<Trip>("trips:1").unwrap(), None);

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.expirations, 1);
    assert!(stats.keys.is_empty());
}

#[tokio::test]
async fn test_search_strategy_compresses_large_results() {
    let cache = Arc::new(cache_over(&MemoryPersistence::new()));
    let strategies = StrategyManager::new(cache.clone());

    let results: Vec<Trip> = (0..100).map(|i| trip(i, "Porto")).collect();
    strategies
        .set("search:porto", &results, "search", None)
        .unwrap();

    match cache.get_payload("search:porto") {
        Some(Payload::Compressed {
            bytes,
            original_size,
        }) => assert!(bytes.len() < original_size),
        other => panic!("expected compressed payload, got {:?}", other),
    }

    let loaded: Option<Vec<Trip>> = strategies.get("search:porto", "search").unwrap();
    assert_eq!(loaded, Some(results));
    assert!(cache.stats().bytes_saved > 0);

    assert_eq!(strategies.invalidate_strategy("search"), 1);
    assert!(!cache.has("search:porto"));
}

#[tokio::test]
async fn test_warmup_runs_high_priority_first() {
    let cache = Arc::new(cache_over(&MemoryPersistence::new()));
    let strategies = Arc::new(StrategyManager::new(cache.clone()));
    let scheduler = WarmupScheduler::new(strategies, WarmupConfig::default());
    let order = Arc::new(Mutex::new(Vec::new()));

    for (key, priority) in [
        ("destinations:all", Priority::Low),
        ("trips:featured", Priority::High),
        ("deals:today", Priority::Medium),
    ] {
        let order = order.clone();
        scheduler.add_job(WarmupJob::new(key, priority, move || {
            let order = order.clone();
            async move {
                order.lock().unwrap().push(key);
                Ok::<_, CacheError>(json!({ "key": key }))
            }
        }));
    }
    scheduler.add_job(WarmupJob::new("broken", Priority::High, || async {
        Err::<i32, _>("upstream timeout")
    }));

    let report = scheduler.run(None).await;

    assert_eq!(
        *order.lock().unwrap(),
        vec!["trips:featured", "deals:today", "destinations:all"]
    );
    assert_eq!(report.failed, vec!["broken"]);
    assert_eq!(report.succeeded.len(), 3);
    assert!(cache.has("trips:featured"));
    assert!(!cache.has("broken"));
}

#[tokio::test]
async fn test_tag_invalidation_leaves_other_entries() {
    let cache = cache_over(&MemoryPersistence::new());
    cache
        .set("trips:1", &trip(1, "Lisbon"), SetOptions::new().with_tags(["trips", "user:7"]))
        .unwrap();
    cache
        .set("trips:2", &trip(2, "Porto"), SetOptions::new().with_tags(["trips"]))
        .unwrap();
    cache
        .set("profile:7", &json!({ "name": "Ana" }), SetOptions::new().with_tags(["user:7"]))
        .unwrap();
    cache.set("config", &json!({}), SetOptions::new()).unwrap();

    assert_eq!(cache.invalidate_by_tags(&["user:7"]), 2);
    assert_eq!(cache.stats().keys, vec!["config", "trips:2"]);

    assert_eq!(cache.invalidate_by_tags(&["missing"]), 0);
    assert_eq!(cache.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_restart_reloads_live_entries() {
    let store = MemoryPersistence::new();
    {
        let cache = cache_over(&store);
        cache
            .set(
                "trips:1",
                &trip(1, "Lisbon"),
                SetOptions::new()
                    .with_ttl(Duration::from_secs(60))
                    .with_tags(["trips"]),
            )
            .unwrap();
        cache.set("trips:2", &trip(2, "Porto"), SetOptions::new()).unwrap();
        cache.delete("trips:2");
    }

    let restarted = cache_over(&store);
    assert_eq!(restarted.get::<Trip>("trips:1").unwrap(), Some(trip(1, "Lisbon")));
    assert!(!restarted.has("trips:2"));

    // Tags survive the restart
    assert_eq!(restarted.invalidate_by_tags(&["trips"]), 1);
    assert!(!store.contains("trips:1"));
}

#[tokio::test(start_paused = true)]
async fn test_restart_keeps_remaining_ttl_and_drops_expired() {
    let store = MemoryPersistence::new();
    let now = chrono::Utc::now();

    let fresh = PersistedEntry {
        key: "trips:fresh".to_string(),
        data: Payload::Raw(json!("fresh")),
        created_at: now - chrono::Duration::seconds(10),
        ttl: Duration::from_secs(20),
        tags: vec![],
    };
    let stale = PersistedEntry {
        key: "trips:stale".to_string(),
        data: Payload::Raw(json!("stale")),
        created_at: now - chrono::Duration::hours(2),
        ttl: Duration::from_secs(60 * 60),
        tags: vec![],
    };
    store.save(&fresh.key, &fresh).unwrap();
    store.save(&stale.key, &stale).unwrap();

    let cache = cache_over(&store);
    assert_eq!(cache.len(), 1);
    assert!(!store.contains("trips:stale"));
    assert_eq!(cache.get::<String>("trips:fresh").unwrap().as_deref(), Some("fresh"));

    tokio::time::advance(Duration::from_secs(11)).await;
    assert!(!cache.has("trips:fresh"));
}

#[tokio::test]
async fn test_corrupt_record_does_not_block_reload() {
    let store = MemoryPersistence::new();
    {
        let cache = cache_over(&store);
        cache.set("trips:1", &trip(1, "Lisbon"), SetOptions::new()).unwrap();
    }
    store.insert_raw("trips:broken", "{not json");

    let cache = cache_over(&store);
    assert!(cache.has("trips:1"));
    assert!(!cache.has("trips:broken"));
    assert!(!store.contains("trips:broken"));
}

#[tokio::test]
async fn test_file_persistence_survives_restart() {
    let dir = TempDir::new().unwrap();
    let config = CacheConfig {
        persistence: PersistenceConfig {
            directory: Some(dir.path().to_path_buf()),
            ..Default::default()
        },
        ..Default::default()
    };

    {
        let cache = Cache::new(config.clone()).unwrap();
        cache.set("trips:1", &trip(1, "Lisbon"), SetOptions::new()).unwrap();
        cache.set("trips:2", &trip(2, "Porto"), SetOptions::new()).unwrap();
        cache.delete("trips:2");
    }

    let files = FilePersistence::new(dir.path()).unwrap();
    assert_eq!(files.load_all().unwrap().len(), 1);

    let restarted = Cache::new(config).unwrap();
    assert!(restarted.persistence_available());
    assert_eq!(restarted.get::<Trip>("trips:1").unwrap(), Some(trip(1, "Lisbon")));
    assert!(!restarted.has("trips:2"));

    restarted.clear();
    assert!(files.load_all().unwrap().is_empty());
}

#[tokio::test]
async fn test_config_file_drives_cache() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tripcache.toml");
    std::fs::write(
        &path,
        r#"
max_size = 2
default_ttl_ms = 60000

[persistence]
enabled = false
"#,
    )
    .unwrap();

    let config = CacheConfig::load_from_file(&path).unwrap();
    let cache = Cache::new(config).unwrap();

    for i in 0..5 {
        cache
            .set(&format!("trips:{}", i), &trip(i, "Faro"), SetOptions::new())
            .unwrap();
    }
    assert!(cache.len() <= 2);
    assert!(cache.has("trips:4"));
}
