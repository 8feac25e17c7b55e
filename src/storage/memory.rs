// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use dashmap::DashMap;
use super::traits::{StorageBackend, StorageError};

/// Volatile backend. Survives nothing, but never fails to initialize.
pub struct InMemoryBackend {
    data: DashMap<String, String>,
    max_bytes: Option<usize>,
}

impl InMemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
            max_bytes: None,
        }
    }

    /// Backend that rejects writes once `max_bytes` of keys and values are held.
    #[must_use]
    pub fn with_capacity_bytes(max_bytes: usize) -> Self {
        Self {
            data: DashMap::new(),
            max_bytes: Some(max_bytes),
        }
    }

    /// Get current record count
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Raw access, bypassing any cache semantics.
    #[must_use]
    pub fn raw(&self, key: &str) -> Option<String> {
        self.data.get(key).map(|r| r.value().clone())
    }

    fn used_bytes_excluding(&self, key: &str) -> usize {
        self.data
            .iter()
            .filter(|r| r.key() != key)
            .map(|r| r.key().len() + r.value().len())
            .sum()
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for InMemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn init(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.raw(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        if let Some(capacity) = self.max_bytes {
            let needed = self.used_bytes_excluding(key) + key.len() + value.len();
            if needed > capacity {
                return Err(StorageError::QuotaExceeded { needed, capacity });
            }
        }
        self.data.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.data.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .data
            .iter()
            .filter(|r| r.key().starts_with(prefix))
            .map(|r| r.key().clone())
            .collect())
    }

    async fn clear(&self, prefix: &str) -> Result<u64, StorageError> {
        let before = self.data.len();
        self.data.retain(|k, _| !k.starts_with(prefix));
        Ok((before - self.data.len()) as u64)
    }
}
