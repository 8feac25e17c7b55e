// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Backup credential persistence.
//!
//! After a successful verification the chain records which method and
//! contact worked, so a later session can go straight to it. One record
//! per user, stored as camelCase JSON under `{prefix}{user_id}`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::types::AuthMethodType;
use crate::cache::now_millis;
use crate::storage::{StorageBackend, StorageError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupCredential {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub method: AuthMethodType,
    /// Epoch millis
    pub created_at: i64,
    /// Epoch millis
    pub expires_at: i64,
    pub is_active: bool,
}

impl BackupCredential {
    #[must_use]
    pub fn new(user_id: impl Into<String>, method: AuthMethodType, ttl: Duration) -> Self {
        let created_at = now_millis();
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        Self {
            user_id: user_id.into(),
            email: None,
            phone: None,
            method,
            created_at,
            expires_at: created_at.saturating_add(ttl_ms),
            is_active: true,
        }
    }

    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    #[must_use]
    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    #[must_use]
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodCount {
    pub name: AuthMethodType,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupStats {
    pub total_credentials: usize,
    pub active_credentials: usize,
    pub expired_credentials: usize,
    /// Per-method counts, ordered by method
    pub methods: Vec<MethodCount>,
}

/// Reads and writes [`BackupCredential`] records on a storage backend.
pub struct BackupCredentialStore {
    backend: Arc<dyn StorageBackend>,
    prefix: String,
}

impl BackupCredentialStore {
    pub fn new(backend: Arc<dyn StorageBackend>, prefix: impl Into<String>) -> Self {
        Self { backend, prefix: prefix.into() }
    }

    fn key(&self, user_id: &str) -> String {
        format!("{}{}", self.prefix, user_id)
    }

    /// Store (or replace) the user's record. Storage faults propagate.
    #[tracing::instrument(skip(self, credential), fields(user_id = %credential.user_id))]
    pub async fn save(&self, credential: &BackupCredential) -> Result<(), StorageError> {
        if credential.user_id.trim().is_empty() {
            return Err(StorageError::Validation("backup credential without user id".into()));
        }
        let json = serde_json::to_string(credential).map_err(|e| StorageError::Serialization {
            key: self.key(&credential.user_id),
            reason: e.to_string(),
        })?;
        self.backend.init().await?;
        self.backend.set(&self.key(&credential.user_id), &json).await?;
        debug!(method = %credential.method, "Saved backup credential");
        Ok(())
    }

    /// Load the user's record. Expired or unreadable records are deleted
    /// and reported as absent.
    pub async fn load(&self, user_id: &str) -> Result<Option<BackupCredential>, StorageError> {
        self.backend.init().await?;
        let key = self.key(user_id);
        let Some(raw) = self.backend.get(&key).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<BackupCredential>(&raw) {
            Ok(credential) if credential.is_expired_at(now_millis()) => {
                debug!(user_id, "Backup credential expired, removing");
                self.backend.delete(&key).await?;
                Ok(None)
            }
            Ok(credential) => Ok(Some(credential)),
            Err(e) => {
                warn!(user_id, error = %e, "Corrupt backup credential, removing");
                self.backend.delete(&key).await?;
                Ok(None)
            }
        }
    }

    pub async fn remove(&self, user_id: &str) -> Result<(), StorageError> {
        self.backend.init().await?;
        self.backend.delete(&self.key(user_id)).await
    }

    /// Delete every expired or unreadable record. Returns how many went.
    pub async fn cleanup_expired(&self) -> Result<usize, StorageError> {
        self.backend.init().await?;
        let now = now_millis();
        let mut removed = 0;
        for key in self.backend.list(&self.prefix).await? {
            let Some(raw) = self.backend.get(&key).await? else {
                continue;
            };
            let stale = serde_json::from_str::<BackupCredential>(&raw)
                .map_or(true, |c| c.is_expired_at(now));
            if stale {
                self.backend.delete(&key).await?;
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "Cleaned up expired backup credentials");
        }
        Ok(removed)
    }

    pub async fn stats(&self) -> Result<BackupStats, StorageError> {
        self.backend.init().await?;
        let now = now_millis();
        let mut stats = BackupStats::default();
        let mut methods: BTreeMap<AuthMethodType, usize> = BTreeMap::new();

        for key in self.backend.list(&self.prefix).await? {
            let Some(raw) = self.backend.get(&key).await? else {
                continue;
            };
            let Ok(credential) = serde_json::from_str::<BackupCredential>(&raw) else {
                continue;
            };
            stats.total_credentials += 1;
            if credential.is_expired_at(now) {
                stats.expired_credentials += 1;
            } else if credential.is_active {
                stats.active_credentials += 1;
            }
            *methods.entry(credential.method).or_default() += 1;
        }

        stats.methods = methods
            .into_iter()
            .map(|(name, count)| MethodCount { name, count })
            .collect();
        Ok(stats)
    }
}
