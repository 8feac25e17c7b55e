// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Simple key/value fallback backend.
//!
//! The whole keyspace is one JSON object on disk, rewritten on every
//! mutation (write to a sibling temp file, then rename). Capacity is a
//! fixed byte budget over keys plus values, like browser local storage.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, warn};

use super::traits::{StorageBackend, StorageError};

pub struct FileBackend {
    path: PathBuf,
    max_bytes: usize,
    data: RwLock<BTreeMap<String, String>>,
    loaded: OnceCell<()>,
    /// Serializes file rewrites
    write_lock: Mutex<()>,
}

impl FileBackend {
    #[must_use]
    pub fn new(path: impl AsRef<Path>, max_bytes: usize) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_bytes,
            data: RwLock::new(BTreeMap::new()),
            loaded: OnceCell::new(),
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes currently held (keys plus values).
    #[must_use]
    pub fn used_bytes(&self) -> usize {
        self.data.read().iter().map(|(k, v)| k.len() + v.len()).sum()
    }

    fn ensure_loaded(&self) -> Result<(), StorageError> {
        if self.loaded.initialized() {
            Ok(())
        } else {
            Err(StorageError::Unavailable("file backend not initialized".into()))
        }
    }

    async fn load(&self) -> Result<(), StorageError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                match serde_json::from_slice::<BTreeMap<String, String>>(&bytes) {
                    Ok(map) => {
                        debug!(path = %self.path.display(), records = map.len(), "Loaded fallback store");
                        *self.data.write() = map;
                    }
                    Err(e) => {
                        // Unreadable file: start empty rather than refuse service
                        warn!(path = %self.path.display(), error = %e, "Fallback store is corrupt, starting empty");
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if let Some(parent) = self.path.parent() {
                    if !parent.as_os_str().is_empty() {
                        tokio::fs::create_dir_all(parent)
                            .await
                            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
                    }
                }
            }
            Err(e) => return Err(StorageError::Unavailable(e.to_string())),
        }

        // Probe writability up front
        self.persist().await.map_err(|e| StorageError::Unavailable(e.to_string()))
    }

    async fn persist(&self) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let bytes = serde_json::to_vec(&*self.data.read())
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| StorageError::Backend(format!("write {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StorageError::Backend(format!("rename {}: {}", self.path.display(), e)))?;
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn init(&self) -> Result<(), StorageError> {
        self.loaded.get_or_try_init(|| self.load()).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.ensure_loaded()?;
        Ok(self.data.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.ensure_loaded()?;
        let previous = {
            let mut data = self.data.write();
            let used: usize = data
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let needed = used + key.len() + value.len();
            if needed > self.max_bytes {
                return Err(StorageError::QuotaExceeded { needed, capacity: self.max_bytes });
            }
            data.insert(key.to_string(), value.to_string())
        };

        if let Err(e) = self.persist().await {
            // Keep memory and disk in agreement
            let mut data = self.data.write();
            match previous {
                Some(old) => data.insert(key.to_string(), old),
                None => data.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.ensure_loaded()?;
        let removed = self.data.write().remove(key);
        if removed.is_some() {
            self.persist().await?;
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.ensure_loaded()?;
        Ok(self
            .data
            .read()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn clear(&self, prefix: &str) -> Result<u64, StorageError> {
        self.ensure_loaded()?;
        let removed = {
            let mut data = self.data.write();
            let before = data.len();
            data.retain(|k, _| !k.starts_with(prefix));
            (before - data.len()) as u64
        };
        if removed > 0 {
            self.persist().await?;
        }
        Ok(removed)
    }
}
