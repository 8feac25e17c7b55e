//! Durability tests for the cache.
//!
//! Exercises the real SQLite and JSON-file backends on disk, plus:
//! 1. **FailingBackend wrappers** - precise fault injection per key or from a call onwards
//! 2. **Restarts** - dropping the cache and reopening the same files
//! 3. **Property tests** - round trip and TTL boundaries
//!
//! Run with: `cargo test --test cache_durability`

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use proptest::prelude::*;
use serde_json::{json, Value};
use tempfile::TempDir;

use dashboard_resilience::auth::{AuthMethodType, BackupCredential, BackupCredentialStore};
use dashboard_resilience::config::CacheConfig;
use dashboard_resilience::storage::{FileBackend, InMemoryBackend, SqlBackend};
use dashboard_resilience::{DurableCache, PendingSyncItem, SetOptions, StorageBackend, StorageError};

// =============================================================================
// Failing Backend Wrapper - Precise Error Injection
// =============================================================================

/// Wraps a backend and fails writes to matching keys, or every call once
/// broken.
struct FailingBackend<S: StorageBackend> {
    inner: S,
    call_count: AtomicU64,
    /// Writes to keys containing any of these fail
    fail_keys: Vec<String>,
    broken: AtomicBool,
}

impl<S: StorageBackend> FailingBackend<S> {
    fn new(inner: S) -> Self {
        Self {
            inner,
            call_count: AtomicU64::new(0),
            fail_keys: Vec::new(),
            broken: AtomicBool::new(false),
        }
    }

    fn failing_writes_to(inner: S, fragments: &[&str]) -> Self {
        let mut backend = Self::new(inner);
        backend.fail_keys = fragments.iter().map(|f| f.to_string()).collect();
        backend
    }

    fn break_now(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }

    fn heal(&self) {
        self.broken.store(false, Ordering::SeqCst);
    }

    fn maybe_fail(&self) -> Result<(), StorageError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if self.broken.load(Ordering::SeqCst) {
            Err(StorageError::Backend("injected: backend down".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl<S: StorageBackend> StorageBackend for FailingBackend<S> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn init(&self) -> Result<(), StorageError> {
        self.maybe_fail()?;
        self.inner.init().await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.maybe_fail()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.maybe_fail()?;
        if self.fail_keys.iter().any(|f| key.contains(f.as_str())) {
            return Err(StorageError::Backend(format!("injected: write to {} failed", key)));
        }
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.maybe_fail()?;
        self.inner.delete(key).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.maybe_fail()?;
        self.inner.list(prefix).await
    }

    async fn clear(&self, prefix: &str) -> Result<u64, StorageError> {
        self.maybe_fail()?;
        self.inner.clear(prefix).await
    }
}

fn on_disk_config(dir: &TempDir) -> CacheConfig {
    CacheConfig {
        sql_url: Some(format!("sqlite://{}?mode=rwc", dir.path().join("cache.db").display())),
        fallback_path: Some(dir.path().join("cache.json").display().to_string()),
        ..Default::default()
    }
}

// =============================================================================
// Restarts
// =============================================================================

#[tokio::test]
async fn test_sql_primary_survives_restart() {
    let dir = TempDir::new().unwrap();
    let subscription = json!({"id": "sub_123", "status": "active", "seats": 5});

    {
        let cache = DurableCache::new(on_disk_config(&dir));
        assert_eq!(cache.init().await, Some("sql"));
        cache
            .set("/api/subscription", &subscription, SetOptions::default().with_tag("subscription"))
            .await
            .unwrap();
    }

    let reopened = DurableCache::new(on_disk_config(&dir));
    assert_eq!(reopened.init().await, Some("sql"));
    assert_eq!(reopened.get("/api/subscription").await.unwrap(), Some(subscription));
    assert_eq!(reopened.get_by_tag("subscription").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_file_fallback_when_primary_unusable() {
    let dir = TempDir::new().unwrap();
    let config = CacheConfig {
        // SQLite will not create the missing directory
        sql_url: Some(format!(
            "sqlite://{}?mode=rwc",
            dir.path().join("missing").join("cache.db").display()
        )),
        ..on_disk_config(&dir)
    };

    {
        let cache = DurableCache::new(config.clone());
        assert_eq!(cache.init().await, Some("file"));
        cache.set("plan", &json!({"tier": "pro"}), SetOptions::default()).await.unwrap();
    }

    assert!(dir.path().join("cache.json").exists());
    let reopened = DurableCache::new(config);
    reopened.init().await;
    assert_eq!(reopened.get("plan").await.unwrap(), Some(json!({"tier": "pro"})));
}

#[tokio::test]
async fn test_nothing_usable_surfaces_unavailable() {
    let primary = Arc::new(FailingBackend::new(InMemoryBackend::new()));
    let fallback = Arc::new(FailingBackend::new(InMemoryBackend::new()));
    primary.break_now();
    fallback.break_now();

    let cache = DurableCache::with_backends(
        CacheConfig::default(),
        Some(primary as Arc<dyn StorageBackend>),
        fallback,
    );
    assert_eq!(cache.init().await, None);
    assert!(matches!(cache.get("k").await, Err(StorageError::Unavailable(_))));
    assert!(matches!(
        cache.set("k", &json!(1), SetOptions::default()).await,
        Err(StorageError::Unavailable(_))
    ));
}

// =============================================================================
// Fault injection
// =============================================================================

#[tokio::test]
async fn test_primary_fault_mid_operation_fails_over() {
    let primary = Arc::new(FailingBackend::new(InMemoryBackend::new()));
    let fallback = Arc::new(InMemoryBackend::new());
    let cache = DurableCache::with_backends(
        CacheConfig::default(),
        Some(primary.clone() as Arc<dyn StorageBackend>),
        fallback.clone(),
    );
    assert_eq!(cache.init().await, Some("memory"));

    primary.break_now();
    cache.set("k", &json!({"v": 1}), SetOptions::default()).await.unwrap();

    assert!(fallback.raw(&cache.namespaced_key("k")).is_some());
    assert_eq!(cache.get("k").await.unwrap(), Some(json!({"v": 1})));
    assert!(primary.call_count.load(Ordering::SeqCst) >= 2);
}

fn payload_of(raw: &str) -> Value {
    serde_json::from_str::<Value>(raw).unwrap()["payload"].clone()
}

#[tokio::test]
async fn test_writes_during_primary_fault_survive_recovery() {
    let primary = Arc::new(FailingBackend::new(InMemoryBackend::new()));
    let fallback = Arc::new(InMemoryBackend::new());
    let cache = DurableCache::with_backends(
        CacheConfig::default(),
        Some(primary.clone() as Arc<dyn StorageBackend>),
        fallback.clone(),
    );
    cache.init().await;

    cache.set("sub", &json!({"v": 1}), SetOptions::default()).await.unwrap();
    cache.set("gone", &json!("old"), SetOptions::default()).await.unwrap();

    primary.break_now();
    cache.set("sub", &json!({"v": 2}), SetOptions::default()).await.unwrap();
    cache.set("fresh", &json!(3), SetOptions::default()).await.unwrap();
    cache.delete("gone").await.unwrap();

    // While the primary is down the fallback answers for those keys
    assert_eq!(cache.get("sub").await.unwrap(), Some(json!({"v": 2})));
    assert_eq!(cache.get("gone").await.unwrap(), None);

    primary.heal();
    assert_eq!(cache.get("sub").await.unwrap(), Some(json!({"v": 2})));
    assert_eq!(cache.get("fresh").await.unwrap(), Some(json!(3)));
    assert_eq!(cache.get("gone").await.unwrap(), None);
    assert_eq!(cache.keys().await.unwrap(), vec!["fresh", "sub"]);

    // Written back: the primary holds the newest values and the copies are gone
    let sub_row = primary.inner.raw(&cache.namespaced_key("sub")).unwrap();
    assert_eq!(payload_of(&sub_row), json!({"v": 2}));
    assert!(primary.inner.raw(&cache.namespaced_key("gone")).is_none());
    assert!(fallback.raw(&cache.namespaced_key("sub")).is_none());
    assert!(fallback.raw(&cache.namespaced_key("fresh")).is_none());
}

#[tokio::test]
async fn test_write_back_waits_while_primary_stays_down() {
    let primary = Arc::new(FailingBackend::new(InMemoryBackend::new()));
    let fallback = Arc::new(InMemoryBackend::new());
    let cache = DurableCache::with_backends(
        CacheConfig::default(),
        Some(primary.clone() as Arc<dyn StorageBackend>),
        fallback.clone(),
    );
    cache.init().await;

    primary.break_now();
    cache.set("k", &json!("offline"), SetOptions::default()).await.unwrap();
    for _ in 0..3 {
        assert_eq!(cache.get("k").await.unwrap(), Some(json!("offline")));
    }
    assert_eq!(cache.keys().await.unwrap(), vec!["k"]);
    assert!(fallback.raw(&cache.namespaced_key("k")).is_some());

    primary.heal();
    assert_eq!(cache.get("k").await.unwrap(), Some(json!("offline")));
    assert!(primary.inner.raw(&cache.namespaced_key("k")).is_some());
}

#[tokio::test]
async fn test_clear_during_primary_fault_is_applied_on_recovery() {
    let primary = Arc::new(FailingBackend::new(InMemoryBackend::new()));
    let cache = DurableCache::with_backends(
        CacheConfig::default(),
        Some(primary.clone() as Arc<dyn StorageBackend>),
        Arc::new(InMemoryBackend::new()),
    );
    cache.init().await;
    cache.set("a", &json!(1), SetOptions::default()).await.unwrap();

    primary.break_now();
    cache.clear().await.unwrap();
    assert_eq!(cache.get("a").await.unwrap(), None);
    cache.set("b", &json!(2), SetOptions::default()).await.unwrap();

    primary.heal();
    assert_eq!(cache.keys().await.unwrap(), vec!["b"]);
    assert_eq!(cache.get("a").await.unwrap(), None);
    assert!(primary.inner.raw(&cache.namespaced_key("a")).is_none());
    assert!(primary.inner.raw(&cache.namespaced_key("b")).is_some());
}

#[tokio::test]
async fn test_clear_succeeds_when_fallback_clear_fails() {
    let fallback = Arc::new(FailingBackend::new(InMemoryBackend::new()));
    let cache = DurableCache::with_backends(
        CacheConfig::default(),
        Some(Arc::new(InMemoryBackend::new()) as Arc<dyn StorageBackend>),
        fallback.clone(),
    );
    cache.init().await;
    cache.set("a", &json!(1), SetOptions::default()).await.unwrap();

    fallback.break_now();
    assert_eq!(cache.clear().await.unwrap(), 1);
    assert!(cache.keys().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_degraded_session_records_are_written_back_on_restart() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("cache.db");
    let json_path = dir.path().join("cache.json");

    {
        let cache = DurableCache::new(on_disk_config(&dir));
        assert_eq!(cache.init().await, Some("sql"));
        cache.set("plan", &json!({"tier": "basic"}), SetOptions::default()).await.unwrap();
    }

    // SQLite unusable for a whole session: the edit lands in the JSON file
    {
        let primary = Arc::new(FailingBackend::new(SqlBackend::sqlite_file(&db)));
        primary.break_now();
        let cache = DurableCache::with_backends(
            CacheConfig::default(),
            Some(primary as Arc<dyn StorageBackend>),
            Arc::new(FileBackend::new(&json_path, 1024 * 1024)),
        );
        assert_eq!(cache.init().await, Some("file"));
        cache.set("plan", &json!({"tier": "pro"}), SetOptions::default()).await.unwrap();
    }

    // No explicit init: the first read selects the backends and adopts the fallback record
    let reopened = DurableCache::new(on_disk_config(&dir));
    assert_eq!(reopened.get("plan").await.unwrap(), Some(json!({"tier": "pro"})));
    assert_eq!(reopened.active_backend(), Some("sql"));

    let sql = SqlBackend::sqlite_file(&db);
    sql.init().await.unwrap();
    let row = sql.get(&reopened.namespaced_key("plan")).await.unwrap().unwrap();
    assert_eq!(payload_of(&row), json!({"tier": "pro"}));
}

#[tokio::test]
async fn test_sync_partial_failure_is_isolated_and_durable() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cache.json");

    let failing = Arc::new(FailingBackend::failing_writes_to(
        FileBackend::new(&path, 1024 * 1024),
        &["/b"],
    ));
    let cache = DurableCache::with_backends(CacheConfig::default(), None, failing);
    cache.init().await;

    let a = PendingSyncItem::new("/a", json!({"status": "paused"}));
    let b = PendingSyncItem::new("/b", json!({"status": "cancelled"}));
    cache.queue_pending(&a).await.unwrap();

    let report = cache.sync(&[a.clone(), b]).await;
    assert_eq!(report.successful, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].key, "/b");
    assert!(cache.pending_items().await.unwrap().is_empty());

    // A is on disk: a fresh cache over the same file sees it
    drop(cache);
    let reopened = DurableCache::with_backends(CacheConfig::default(), None, Arc::new(FileBackend::new(&path, 1024 * 1024)));
    assert_eq!(reopened.get("/a").await.unwrap(), Some(a.payload));
    assert_eq!(reopened.get("/b").await.unwrap(), None);
}

#[tokio::test]
async fn test_quota_exceeded_on_small_fallback() {
    let dir = TempDir::new().unwrap();
    let config = CacheConfig {
        fallback_path: Some(dir.path().join("tiny.json").display().to_string()),
        fallback_max_bytes: 256,
        ..Default::default()
    };
    let cache = DurableCache::new(config);
    assert_eq!(cache.init().await, Some("file"));

    let big = "x".repeat(1024);
    let err = cache.set("big", &big, SetOptions::default()).await.unwrap_err();
    assert!(matches!(err, StorageError::QuotaExceeded { .. }));
    assert_eq!(cache.get("big").await.unwrap(), None);
}

// =============================================================================
// Expiry and namespacing
// =============================================================================

#[tokio::test]
async fn test_expired_row_is_deleted_from_sqlite() {
    let dir = TempDir::new().unwrap();
    let config = on_disk_config(&dir);
    let cache = DurableCache::new(config.clone());
    cache.init().await;

    cache
        .set("short", &json!("lived"), SetOptions::default().with_ttl(Duration::from_millis(50)))
        .await
        .unwrap();
    assert!(cache.get("short").await.unwrap().is_some());

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(cache.peek("short").await.unwrap().is_some());
    assert_eq!(cache.get("short").await.unwrap(), None);

    let raw = SqlBackend::sqlite_file(dir.path().join("cache.db"));
    raw.init().await.unwrap();
    assert_eq!(raw.get(&cache.namespaced_key("short")).await.unwrap(), None);
}

#[tokio::test]
async fn test_backup_credentials_share_storage_but_not_namespace() {
    let dir = TempDir::new().unwrap();
    let cache = DurableCache::new(on_disk_config(&dir));
    cache.init().await;

    let store = BackupCredentialStore::new(cache.storage().await.unwrap(), "backup_auth_");
    store
        .save(&BackupCredential::new("u1", AuthMethodType::Email, Duration::from_secs(3600)))
        .await
        .unwrap();
    cache.set("/api/subscription", &json!({"id": "sub_123"}), SetOptions::default()).await.unwrap();

    assert_eq!(cache.clear().await.unwrap(), 1);
    assert!(store.load("u1").await.unwrap().is_some());
    assert!(cache.keys().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_concurrent_writes_to_one_key_leave_a_whole_value() {
    let dir = TempDir::new().unwrap();
    let cache = Arc::new(DurableCache::new(on_disk_config(&dir)));
    cache.init().await;

    let mut handles = Vec::new();
    for n in 0..16 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move {
            cache.set("hot", &json!({"writer": n}), SetOptions::default()).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let value = cache.get("hot").await.unwrap().unwrap();
    let writer = value["writer"].as_i64().unwrap();
    assert!((0..16).contains(&writer));
}

// =============================================================================
// Properties
// =============================================================================

fn json_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| Value::Number(n.into())),
        ".*".prop_map(Value::String),
    ];

    leaf.prop_recursive(3, 32, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::hash_map("[a-z]{1,8}", inner, 0..6)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_set_then_get_round_trips(key in "[a-z/_]{1,24}", payload in json_strategy()) {
        let rt = runtime();
        let got = rt.block_on(async {
            let cache = DurableCache::with_backends(CacheConfig::default(), None, Arc::new(InMemoryBackend::new()));
            cache.set(&key, &payload, SetOptions::default()).await.unwrap();
            let first = cache.get(&key).await.unwrap();
            let second = cache.get(&key).await.unwrap();
            assert_eq!(first, second);
            first
        });
        prop_assert_eq!(got, Some(payload));
    }

    #[test]
    fn prop_entry_expires_exactly_at_ttl(ttl_ms in 1u64..10_000_000, payload in json_strategy()) {
        let entry = dashboard_resilience::CacheEntry::new("k", payload, Duration::from_millis(ttl_ms), vec![]);
        let ttl = i64::try_from(ttl_ms).unwrap();
        prop_assert!(entry.expires_at >= entry.stored_at);
        prop_assert!(!entry.is_expired_at(entry.stored_at + ttl - 1));
        prop_assert!(entry.is_expired_at(entry.stored_at + ttl));
    }
}
