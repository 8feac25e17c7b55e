// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Authentication fallback chain.
//!
//! An ordered catalog of sign-in methods, tried by ascending priority.
//! Token methods verify in one call. Contact-channel methods (phone, email)
//! run a challenge/verify flow tracked per contact. A successful verification
//! leaves a [`BackupCredential`] behind so later sessions know which channel
//! worked.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dashboard_resilience::auth::{AuthFallbackManager, AuthMethodType, AuthOptions, Credentials};
//! use dashboard_resilience::config::AuthConfig;
//! use dashboard_resilience::storage::InMemoryBackend;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let auth = AuthFallbackManager::with_http(AuthConfig::default(), Arc::new(InMemoryBackend::new()))?;
//!
//! let sent = auth
//!     .authenticate(AuthMethodType::Phone, &Credentials::phone("+15550100"), &AuthOptions::default())
//!     .await;
//! assert!(sent.requires_verification);
//!
//! let done = auth
//!     .authenticate(
//!         AuthMethodType::Phone,
//!         &Credentials::phone("+15550100").with_code("123456"),
//!         &AuthOptions::default(),
//!     )
//!     .await;
//! println!("signed in: {}", done.success);
//! # Ok(())
//! # }
//! ```

mod backup;
mod error;
mod manager;
mod transport;
mod types;

pub use backup::{BackupCredential, BackupCredentialStore, BackupStats, MethodCount};
pub use error::{AuthError, AuthErrorKind};
pub use manager::AuthFallbackManager;
pub use transport::{AuthEndpoint, AuthResponse, AuthTransport, HttpAuthTransport};
pub use types::{
    AuthAttempt, AuthFailure, AuthMethod, AuthMethodType, AuthOptions, AuthOutcome, AuthUser,
    Credentials, FallbackOutcome, FlowState, Locale, VerificationData,
};
