// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The authentication fallback chain.
//!
//! One long-lived [`AuthFallbackManager`] per application, constructed at the
//! composition root and shared by reference. Two-phase methods are driven by
//! an explicit per-(method, contact) [`FlowState`]:
//!
//! ```text
//! NotStarted ──send──► ChallengeSent ──code ok──► Verified
//!                          │    ▲
//!                     code bad  │ code ok
//!                          ▼    │
//!                          Failed ──no code──► (resend) ChallengeSent
//! ```
//!
//! A call on a flow that has no outstanding challenge always dispatches one,
//! whatever the credentials carry. A verified flow starts a fresh challenge.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::json;
use tracing::{debug, info, warn};

use super::backup::{BackupCredential, BackupCredentialStore, BackupStats};
use super::error::AuthError;
use super::transport::{AuthEndpoint, AuthResponse, AuthTransport, HttpAuthTransport};
use super::types::{
    AuthAttempt, AuthMethod, AuthMethodType, AuthOptions, AuthOutcome, AuthUser, Credentials,
    FallbackOutcome, FlowState, Locale,
};
use crate::cache::now_millis;
use crate::config::AuthConfig;
use crate::metrics;
use crate::storage::{StorageBackend, StorageError};
use crate::transport::TransportError;

type FlowKey = (AuthMethodType, String);

pub struct AuthFallbackManager {
    config: AuthConfig,
    catalog: RwLock<Vec<AuthMethod>>,
    transport: Arc<dyn AuthTransport>,
    backups: BackupCredentialStore,
    flows: DashMap<FlowKey, FlowState>,
}

impl AuthFallbackManager {
    /// Manager with the default catalog, persisting backups on `backend`.
    pub fn new(
        config: AuthConfig,
        transport: Arc<dyn AuthTransport>,
        backend: Arc<dyn StorageBackend>,
    ) -> Self {
        let backups = BackupCredentialStore::new(backend, config.backup_prefix.clone());
        Self {
            config,
            catalog: RwLock::new(AuthMethod::default_catalog()),
            transport,
            backups,
            flows: DashMap::new(),
        }
    }

    /// Manager talking to the verification endpoints at `config.base_url`.
    pub fn with_http(config: AuthConfig, backend: Arc<dyn StorageBackend>) -> Result<Self, TransportError> {
        let transport = HttpAuthTransport::new(&config.base_url, config.request_timeout())?;
        Ok(Self::new(config, Arc::new(transport), backend))
    }

    /// Replace the catalog. Later entries win on duplicate method types.
    #[must_use]
    pub fn with_methods(self, methods: Vec<AuthMethod>) -> Self {
        let mut catalog: Vec<AuthMethod> = Vec::with_capacity(methods.len());
        for method in methods {
            catalog.retain(|m| m.method_type != method.method_type);
            catalog.push(method);
        }
        *self.catalog.write() = catalog;
        self
    }

    #[must_use]
    pub fn locale(&self) -> Locale {
        self.config.locale
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Catalog
    // ═══════════════════════════════════════════════════════════════════════

    /// Available methods, ascending by priority.
    #[must_use]
    pub fn get_available_methods(&self) -> Vec<AuthMethod> {
        let mut methods: Vec<AuthMethod> = self
            .catalog
            .read()
            .iter()
            .filter(|m| m.is_available)
            .cloned()
            .collect();
        methods.sort_by_key(|m| (m.priority, m.method_type));
        methods
    }

    /// Toggle a method, e.g. when its provider reports an outage.
    pub fn set_method_availability(&self, method: AuthMethodType, available: bool) -> Result<(), AuthError> {
        let mut catalog = self.catalog.write();
        let entry = catalog
            .iter_mut()
            .find(|m| m.method_type == method)
            .ok_or_else(|| AuthError::MethodNotFound(method.to_string()))?;
        entry.is_available = available;
        info!(%method, available, "Auth method availability changed");
        Ok(())
    }

    /// Add a method or replace the entry of the same type.
    ///
    /// Priorities are unique across the catalog so ordering stays strict.
    pub fn register_method(&self, method: AuthMethod) -> Result<(), AuthError> {
        let mut catalog = self.catalog.write();
        if let Some(holder) = catalog
            .iter()
            .find(|m| m.priority == method.priority && m.method_type != method.method_type)
        {
            return Err(AuthError::DuplicatePriority {
                priority: method.priority,
                holder: holder.method_type,
            });
        }
        catalog.retain(|m| m.method_type != method.method_type);
        debug!(method = %method.method_type, priority = method.priority, "Registered auth method");
        catalog.push(method);
        Ok(())
    }

    /// Current state of the two-phase flow for `contact`.
    #[must_use]
    pub fn flow_state(&self, method: AuthMethodType, contact: &str) -> FlowState {
        self.flows
            .get(&(method, contact.to_string()))
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Forget every two-phase flow (sign-out).
    pub fn reset_flows(&self) {
        self.flows.clear();
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Authentication
    // ═══════════════════════════════════════════════════════════════════════

    /// Authenticate with a method named by string, as received from a form.
    /// An unknown name comes back as a `MethodNotFound` failure with no
    /// method set.
    pub async fn authenticate_named(
        &self,
        method: &str,
        credentials: &Credentials,
        options: &AuthOptions,
    ) -> AuthOutcome {
        match method.parse::<AuthMethodType>() {
            Ok(method) => self.authenticate(method, credentials, options).await,
            Err(e) => {
                warn!(method, error = %e, "Authentication attempt failed");
                metrics::record_error("auth", "authenticate", e.kind().as_str());
                AuthOutcome::unrecognized(&e, self.config.locale)
            }
        }
    }

    /// Run one method. Never fails: every fault comes back as a failed
    /// outcome carrying a localized message.
    #[tracing::instrument(skip(self, credentials, options), fields(method = %method))]
    pub async fn authenticate(
        &self,
        method: AuthMethodType,
        credentials: &Credentials,
        options: &AuthOptions,
    ) -> AuthOutcome {
        let outcome = match self.try_authenticate(method, credentials, options).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "Authentication attempt failed");
                metrics::record_error("auth", "authenticate", e.kind().as_str());
                AuthOutcome::failed(method, &e, self.config.locale)
            }
        };

        let label = if outcome.success {
            "success"
        } else if outcome.requires_verification {
            "challenge"
        } else {
            "failure"
        };
        metrics::record_auth_attempt(method.as_str(), label);
        outcome
    }

    /// Walk the available methods in priority order, skipping those the
    /// credentials give nothing for. Stops at the first success or at the
    /// first method waiting for a verification code.
    pub async fn authenticate_with_fallback(
        &self,
        credentials: &Credentials,
        options: &AuthOptions,
    ) -> FallbackOutcome {
        let mut attempts = Vec::new();
        let mut last = None;

        for method in self.get_available_methods() {
            let method = method.method_type;
            if !options.permits(method) || credentials.identifier_for(method).is_none() {
                continue;
            }

            let outcome = self.authenticate(method, credentials, options).await;
            attempts.push(AuthAttempt {
                method,
                success: outcome.success,
                error: outcome.error_kind(),
            });
            if outcome.success || outcome.requires_verification {
                return FallbackOutcome { outcome: Some(outcome), attempts };
            }
            debug!(%method, "Falling back to next auth method");
            last = Some(outcome);
        }

        if last.is_none() {
            warn!("No usable authentication method for the supplied credentials");
        }
        FallbackOutcome { outcome: last, attempts }
    }

    async fn try_authenticate(
        &self,
        method: AuthMethodType,
        credentials: &Credentials,
        options: &AuthOptions,
    ) -> Result<AuthOutcome, AuthError> {
        self.check_method(method, options)?;
        if method.is_two_phase() {
            self.two_phase(method, credentials).await
        } else {
            self.single_shot(method, credentials).await
        }
    }

    fn check_method(&self, method: AuthMethodType, options: &AuthOptions) -> Result<(), AuthError> {
        let catalog = self.catalog.read();
        let entry = catalog
            .iter()
            .find(|m| m.method_type == method)
            .ok_or_else(|| AuthError::MethodNotFound(method.to_string()))?;
        if !entry.is_available || !options.permits(method) {
            return Err(AuthError::MethodUnavailable(method));
        }
        Ok(())
    }

    async fn single_shot(&self, method: AuthMethodType, credentials: &Credentials) -> Result<AuthOutcome, AuthError> {
        let token = credentials
            .identifier_for(method)
            .ok_or(AuthError::MissingCredential("token"))?;
        let endpoint = match method {
            AuthMethodType::Firebase => AuthEndpoint::VerifyFirebaseToken,
            _ => AuthEndpoint::VerifyToken,
        };

        let user = accepted(self.transport.post(endpoint, json!({ "token": token })).await?)?;
        info!(user_id = %user.id, "Authenticated");
        Ok(AuthOutcome::authenticated(method, user))
    }

    async fn two_phase(&self, method: AuthMethodType, credentials: &Credentials) -> Result<AuthOutcome, AuthError> {
        let field = contact_field(method);
        let contact = credentials
            .identifier_for(method)
            .ok_or(AuthError::MissingCredential(field))?
            .to_string();
        let code = credentials.code.as_deref().filter(|c| !c.trim().is_empty());
        let state = self.flow_state(method, &contact);

        match (state, code) {
            (FlowState::ChallengeSent { .. } | FlowState::Failed { .. }, Some(code)) => {
                self.verify_code(method, contact, code).await
            }
            (state, code) => {
                if code.is_some() {
                    debug!(%state, "Code supplied without an outstanding challenge, sending one");
                }
                self.send_challenge(method, contact).await
            }
        }
    }

    async fn send_challenge(&self, method: AuthMethodType, contact: String) -> Result<AuthOutcome, AuthError> {
        let endpoint = match method {
            AuthMethodType::Phone => AuthEndpoint::PhoneSendCode,
            _ => AuthEndpoint::EmailSendCode,
        };
        let response = self
            .transport
            .post(endpoint, json!({ contact_field(method): contact }))
            .await?;
        if let Some(error) = response.error {
            return Err(AuthError::InvalidCredential(error));
        }

        metrics::record_challenge_sent(method.as_str());
        info!(%method, "Verification code sent");
        let outcome = AuthOutcome::challenge_sent(method, &contact, self.config.locale);
        self.flows
            .insert((method, contact), FlowState::ChallengeSent { sent_at: now_millis() });
        Ok(outcome)
    }

    async fn verify_code(&self, method: AuthMethodType, contact: String, code: &str) -> Result<AuthOutcome, AuthError> {
        let endpoint = match method {
            AuthMethodType::Phone => AuthEndpoint::PhoneVerifyCode,
            _ => AuthEndpoint::EmailVerifyCode,
        };
        // A transport fault leaves the challenge outstanding.
        let response = self
            .transport
            .post(endpoint, json!({ contact_field(method): contact, "code": code }))
            .await?;

        match accepted(response) {
            Ok(user) => {
                info!(%method, user_id = %user.id, "Verification succeeded");
                self.remember(method, &contact, &user).await;
                self.flows
                    .insert((method, contact), FlowState::Verified { user_id: user.id.clone() });
                Ok(AuthOutcome::authenticated(method, user))
            }
            Err(e) => {
                self.flows
                    .insert((method, contact), FlowState::Failed { reason: e.to_string() });
                Err(e)
            }
        }
    }

    async fn remember(&self, method: AuthMethodType, contact: &str, user: &AuthUser) {
        let mut credential = BackupCredential::new(&user.id, method, Duration::from_millis(self.config.backup_ttl_ms));
        credential.email = user.email.clone();
        credential.phone = user.phone.clone();
        match method {
            AuthMethodType::Phone => credential.phone = Some(contact.to_string()),
            AuthMethodType::Email => credential.email = Some(contact.to_string()),
            _ => {}
        }
        // The user is signed in either way; only the shortcut is lost.
        if let Err(e) = self.backups.save(&credential).await {
            warn!(error = %e, "Failed to persist backup credential");
            metrics::record_error("auth", "save_backup", e.label());
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Backup credentials
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn save_backup_credentials(&self, credential: &BackupCredential) -> Result<(), StorageError> {
        self.backups.save(credential).await
    }

    pub async fn load_backup_credentials(&self, user_id: &str) -> Result<Option<BackupCredential>, StorageError> {
        self.backups.load(user_id).await
    }

    pub async fn remove_backup_credentials(&self, user_id: &str) -> Result<(), StorageError> {
        self.backups.remove(user_id).await
    }

    pub async fn cleanup_expired_credentials(&self) -> Result<usize, StorageError> {
        self.backups.cleanup_expired().await
    }

    pub async fn get_backup_stats(&self) -> Result<BackupStats, StorageError> {
        self.backups.stats().await
    }
}

fn contact_field(method: AuthMethodType) -> &'static str {
    match method {
        AuthMethodType::Phone => "phone",
        AuthMethodType::Email => "email",
        _ => "token",
    }
}

fn accepted(response: AuthResponse) -> Result<AuthUser, AuthError> {
    if let Some(error) = response.error {
        return Err(AuthError::InvalidCredential(error));
    }
    response
        .user
        .ok_or_else(|| AuthError::InvalidCredential("response carried no user".into()))
}
