// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Payload or key rejected before anything was persisted
    #[error("Validation failed: {0}")]
    Validation(String),
    /// No usable backend
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
    #[error("Storage quota exceeded: {needed} bytes needed, {capacity} bytes capacity")]
    QuotaExceeded { needed: usize, capacity: usize },
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Stored record for '{key}' is unreadable: {reason}")]
    Serialization { key: String, reason: String },
}

impl StorageError {
    /// Whether the fault belongs to the backend (and may succeed elsewhere)
    /// rather than to the request itself.
    #[must_use]
    pub fn is_backend_fault(&self) -> bool {
        matches!(self, Self::Backend(_) | Self::Unavailable(_) | Self::QuotaExceeded { .. })
    }

    /// Short label for metrics
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Unavailable(_) => "unavailable",
            Self::QuotaExceeded { .. } => "quota",
            Self::Backend(_) => "backend",
            Self::Serialization { .. } => "serialization",
        }
    }
}

/// A persistent string key/value capability.
///
/// Keys arrive fully namespaced; backends never interpret them beyond
/// prefix matching in [`list`](Self::list) and [`clear`](Self::clear).
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Backend name for logs and metrics
    fn name(&self) -> &'static str;

    /// Probe the backend and prepare it for use. Must be idempotent.
    async fn init(&self) -> Result<(), StorageError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Insert or overwrite a record.
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Keys starting with `prefix`, in no particular order.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Remove every key starting with `prefix`. Returns the number removed.
    async fn clear(&self, prefix: &str) -> Result<u64, StorageError>;
}
