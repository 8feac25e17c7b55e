// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Structured primary backend on SQLite.
//!
//! One row per namespaced key:
//! ```sql
//! CREATE TABLE kv_store (
//!   cache_key  TEXT PRIMARY KEY,
//!   value      TEXT NOT NULL,     -- serialized record (JSON)
//!   updated_at INTEGER NOT NULL   -- epoch millis of the last write
//! )
//! ```
//!
//! The pool is opened lazily by [`StorageBackend::init`], so constructing a
//! `SqlBackend` never fails; a bad URL or unwritable path surfaces from the
//! probe and the cache degrades to its fallback backend.

use async_trait::async_trait;
use sqlx::{AnyPool, Row, any::AnyPoolOptions};
use tokio::sync::OnceCell;
use std::sync::Once;
use std::time::Duration;
use tracing::debug;

use super::traits::{StorageBackend, StorageError};
use crate::resilience::retry::{retry, RetryConfig};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

pub struct SqlBackend {
    url: String,
    pool: OnceCell<AnyPool>,
}

impl SqlBackend {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            pool: OnceCell::new(),
        }
    }

    /// Convenience constructor for a database file, created if missing.
    #[must_use]
    pub fn sqlite_file(path: impl AsRef<std::path::Path>) -> Self {
        Self::new(format!("sqlite://{}?mode=rwc", path.as_ref().to_string_lossy()))
    }

    fn pool(&self) -> Result<&AnyPool, StorageError> {
        self.pool
            .get()
            .ok_or_else(|| StorageError::Unavailable("sql backend not initialized".into()))
    }

    async fn connect(&self) -> Result<AnyPool, StorageError> {
        install_drivers();

        if !self.url.starts_with("sqlite:") {
            return Err(StorageError::Unavailable(format!(
                "unsupported sql url '{}': only sqlite is supported", self.url
            )));
        }

        let pool = retry("sql_connect", &RetryConfig::probe(), || async {
            AnyPoolOptions::new()
                .max_connections(4)
                .acquire_timeout(Duration::from_secs(5))
                .connect(&self.url)
                .await
                .map_err(|e| StorageError::Unavailable(e.to_string()))
        })
        .await
        .result?;

        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&pool)
            .await
            .map_err(|e| StorageError::Unavailable(format!("Failed to enable WAL mode: {}", e)))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                cache_key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| StorageError::Unavailable(format!("Failed to create schema: {}", e)))?;

        debug!(url = %self.url, "SQL backend ready");
        Ok(pool)
    }
}

/// SQLite reports capacity faults as SQLITE_FULL ("database or disk is full").
fn map_write_error(e: sqlx::Error, needed: usize) -> StorageError {
    let msg = e.to_string();
    if msg.contains("is full") {
        StorageError::QuotaExceeded { needed, capacity: 0 }
    } else {
        StorageError::Backend(msg)
    }
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[async_trait]
impl StorageBackend for SqlBackend {
    fn name(&self) -> &'static str {
        "sql"
    }

    async fn init(&self) -> Result<(), StorageError> {
        self.pool.get_or_try_init(|| self.connect()).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let row = sqlx::query("SELECT value FROM kv_store WHERE cache_key = ?")
            .bind(key)
            .fetch_optional(self.pool()?)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(row.and_then(|row| {
            // Any driver may hand TEXT back as bytes
            row.try_get::<String, _>("value").ok().or_else(|| {
                row.try_get::<Vec<u8>, _>("value")
                    .ok()
                    .and_then(|bytes| String::from_utf8(bytes).ok())
            })
        }))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO kv_store (cache_key, value, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT(cache_key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(now_millis())
        .execute(self.pool()?)
        .await
        .map_err(|e| map_write_error(e, key.len() + value.len()))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM kv_store WHERE cache_key = ?")
            .bind(key)
            .execute(self.pool()?)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let rows = sqlx::query("SELECT cache_key FROM kv_store WHERE substr(cache_key, 1, ?) = ?")
            .bind(prefix.len() as i64)
            .bind(prefix)
            .fetch_all(self.pool()?)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                row.try_get::<String, _>("cache_key").ok().or_else(|| {
                    row.try_get::<Vec<u8>, _>("cache_key")
                        .ok()
                        .and_then(|bytes| String::from_utf8(bytes).ok())
                })
            })
            .collect())
    }

    async fn clear(&self, prefix: &str) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM kv_store WHERE substr(cache_key, 1, ?) = ?")
            .bind(prefix.len() as i64)
            .bind(prefix)
            .execute(self.pool()?)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(result.rows_affected())
    }
}
