// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Offline dashboard walkthrough.
//!
//! Demonstrates:
//! 1. Mounting the hook against a healthy API (SQLite-backed cache)
//! 2. Losing the network and keeping the subscription on screen
//! 3. Editing offline and replaying the edit on reconnect
//! 4. Riding out an API outage on cached data
//! 5. Signing in through the fallback chain while the primary provider is down
//! 6. Displaying metrics
//!
//! Everything runs in-process: the API and the auth endpoints are simulated,
//! so no services are needed.
//!
//! # Run
//!
//! ```bash
//! cargo run --example offline_dashboard
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use parking_lot::Mutex;
use serde_json::{json, Value};

use dashboard_resilience::auth::{
    AuthEndpoint, AuthFallbackManager, AuthOptions, AuthResponse, AuthTransport, AuthUser, Credentials,
};
use dashboard_resilience::config::{AuthConfig, CacheConfig, FetchConfig, HookConfig};
use dashboard_resilience::fetch::{FetchOrchestrator, ResourceClient};
use dashboard_resilience::{ConnectivityMonitor, DurableCache, HookState, ResilienceHook, TransportError};

/// Simulated subscription API that can be taken down.
struct DemoApi {
    up: AtomicBool,
    subscription: Mutex<Value>,
}

#[async_trait]
impl ResourceClient for DemoApi {
    async fn get(&self, _resource: &str) -> Result<Value, TransportError> {
        if self.up.load(Ordering::SeqCst) {
            Ok(self.subscription.lock().clone())
        } else {
            Err(TransportError::Status { status: 503, body: "maintenance".into() })
        }
    }
}

/// Simulated auth endpoints with the primary provider in an outage.
struct DemoAuth;

#[async_trait]
impl AuthTransport for DemoAuth {
    async fn post(&self, endpoint: AuthEndpoint, body: Value) -> Result<AuthResponse, TransportError> {
        match endpoint {
            AuthEndpoint::VerifyFirebaseToken => Err(TransportError::Network("identity provider unreachable".into())),
            AuthEndpoint::PhoneSendCode => Ok(AuthResponse::sent()),
            AuthEndpoint::PhoneVerifyCode if body["code"] == "123456" => Ok(AuthResponse::user(AuthUser {
                id: "user-42".into(),
                email: None,
                phone: body["phone"].as_str().map(str::to_string),
                name: Some("Ana".into()),
                extra: Default::default(),
            })),
            _ => Ok(AuthResponse::rejected("Invalid code")),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install metrics recorder
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║        dashboard-resilience: Offline Dashboard Example        ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Wire the stack and mount
    // ─────────────────────────────────────────────────────────────────────────
    let db_path = std::env::temp_dir().join("dashboard_resilience_demo.db");
    let json_path = std::env::temp_dir().join("dashboard_resilience_demo.json");

    println!("📦 Configuring cache at {}", db_path.display());
    let cache = Arc::new(DurableCache::new(CacheConfig {
        sql_url: Some(format!("sqlite://{}?mode=rwc", db_path.display())),
        fallback_path: Some(json_path.display().to_string()),
        ..Default::default()
    }));
    let backend = cache.init().await;
    println!("   └─ Active backend: {}", backend.unwrap_or("none"));
    cache.clear().await?;

    let api = Arc::new(DemoApi {
        up: AtomicBool::new(true),
        subscription: Mutex::new(json!({"id": "sub_123", "status": "active", "plan": "pro", "seats": 5})),
    });
    let connectivity = Arc::new(ConnectivityMonitor::new(true));
    let fetch_config = FetchConfig {
        initial_backoff_ms: 50,
        max_backoff_ms: 200,
        ..Default::default()
    };
    let orchestrator = FetchOrchestrator::new(cache.clone(), api.clone(), fetch_config)
        .with_connectivity(connectivity.clone());
    let auth = AuthFallbackManager::new(AuthConfig::default(), Arc::new(DemoAuth), cache.storage().await?);
    let hook = ResilienceHook::new(
        HookConfig::default(),
        Arc::new(orchestrator),
        Arc::new(auth),
        connectivity.clone(),
    );

    println!("\n🚀 Mounting...");
    show(&hook.mount().await);

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Network drops
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📴 Network lost");
    show(&hook.on_connectivity_change(false).await);

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Edit offline, reconnect
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n✏️  Pausing the subscription while offline...");
    let outcome = hook
        .submit_mutation(json!({"id": "sub_123", "status": "paused", "plan": "pro", "seats": 5}))
        .await?;
    println!("   └─ Mutation: {:?}", outcome);
    show(&hook.state());

    println!("\n📶 Network back");
    show(&hook.on_connectivity_change(true).await);
    println!("   └─ Pending after sync: {}", hook.cache().pending_items().await?.len());

    // ─────────────────────────────────────────────────────────────────────────
    // 4. API outage
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🔥 API goes into maintenance, forcing a refresh...");
    api.up.store(false, Ordering::SeqCst);
    show(&hook.refresh(true).await);

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Sign in through the fallback chain
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🔐 Signing in (primary provider is down)...");
    let credentials = Credentials {
        token: Some("firebase-id-token".into()),
        phone: Some("+15550100".into()),
        ..Default::default()
    };
    let options = AuthOptions::default();
    let chain = hook.auth().authenticate_with_fallback(&credentials, &options).await;
    for attempt in &chain.attempts {
        println!("   └─ {}: success={} error={:?}", attempt.method, attempt.success, attempt.error);
    }
    if let Some(outcome) = &chain.outcome {
        let method = outcome.method.map_or("-", |m| m.as_str());
        println!("   └─ Waiting for code via {}: {}", method, outcome.requires_verification);
    }

    let verified = hook
        .auth()
        .authenticate(
            dashboard_resilience::AuthMethodType::Phone,
            &Credentials::phone("+15550100").with_code("123456"),
            &options,
        )
        .await;
    println!("   └─ Verified: {} as {:?}", verified.success, verified.user.map(|u| u.id));
    let stats = hook.auth().get_backup_stats().await?;
    println!("   └─ Backup credentials: {} active", stats.active_credentials);

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Metrics
    // ─────────────────────────────────────────────────────────────────────────
    let rolling = hook.metrics();
    println!("\n📊 Hook Metrics (last {} fetches):", rolling.samples);
    println!("   ├─ Avg response: {:.1} ms", rolling.average_response_time_ms);
    println!("   ├─ Cache hit rate: {:.0}%", rolling.cache_hit_rate * 100.0);
    println!("   └─ Error rate: {:.0}%", rolling.error_rate * 100.0);

    let usage = hook.cache().storage_usage().await?;
    println!("\n💾 Cache: {} items, ~{} bytes on {}", usage.item_count, usage.approximate_bytes, usage.backend.unwrap_or("none"));

    println!("\n📈 Raw Metrics:");
    dump_metrics(&snapshotter);

    // ─────────────────────────────────────────────────────────────────────────
    // Cleanup
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🧹 Cleaning up demo files...");
    drop(hook);
    drop(cache);
    for path in [&db_path, &json_path] {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                println!("   └─ Warning: could not remove {}: {}", path.display(), e);
            }
        }
    }
    let _ = std::fs::remove_file(db_path.with_extension("db-shm"));
    let _ = std::fs::remove_file(db_path.with_extension("db-wal"));

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║                    Example complete!                          ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    Ok(())
}

fn show(state: &HookState) {
    let status = state
        .field("status")
        .and_then(Value::as_str)
        .unwrap_or("-");
    println!(
        "   └─ {} | subscription={} online={} offline_data={} connection={:?}",
        state.status, status, state.is_online, state.using_offline_data, state.connection_status
    );
    if let Some(notice) = &state.notice {
        println!("      notice: {}", notice);
    }
    if let Some(error) = &state.error {
        println!("      error: {}", error);
    }
}

/// Dump all captured metrics, grouped by kind
fn dump_metrics(snapshotter: &Snapshotter) {
    let mut counters = vec![];
    let mut gauges = vec![];
    let mut histograms = vec![];

    for (composite_key, _, _, value) in snapshotter.snapshot().into_vec() {
        let (_, key) = composite_key.into_parts();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let label_str = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };
        let name = format!("{}{}", key.name(), label_str);

        match value {
            DebugValue::Counter(v) => counters.push((name, v)),
            DebugValue::Gauge(v) => gauges.push((name, v.into_inner())),
            DebugValue::Histogram(samples) => {
                let count = samples.len();
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                histograms.push((name, count, sum));
            }
        }
    }

    counters.sort();
    gauges.sort_by(|a, b| a.0.cmp(&b.0));
    histograms.sort_by(|a, b| a.0.cmp(&b.0));

    for (name, value) in &counters {
        println!("   ├─ {} = {}", name, value);
    }
    for (name, value) in &gauges {
        println!("   ├─ {} = {:.2}", name, value);
    }
    for (name, count, sum) in &histograms {
        let avg = if *count > 0 { sum / *count as f64 } else { 0.0 };
        println!("   ├─ {} count={} avg={:.4}", name, count, avg);
    }
    if counters.is_empty() && gauges.is_empty() && histograms.is_empty() {
        println!("   └─ (no metrics recorded)");
    }
}
