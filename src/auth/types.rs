// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the authentication fallback chain.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::{AuthError, AuthErrorKind};

/// Authentication channels, from provider token to contact-channel codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethodType {
    /// Token issued by the primary identity provider
    Firebase,
    /// One-time code sent by SMS
    Phone,
    /// One-time code sent by email
    Email,
    /// Pre-issued backup token
    Token,
}

impl AuthMethodType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Firebase => "firebase",
            Self::Phone => "phone",
            Self::Email => "email",
            Self::Token => "token",
        }
    }

    /// Whether the method needs a challenge before verification.
    #[must_use]
    pub fn is_two_phase(&self) -> bool {
        matches!(self, Self::Phone | Self::Email)
    }
}

impl fmt::Display for AuthMethodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthMethodType {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "firebase" => Ok(Self::Firebase),
            "phone" => Ok(Self::Phone),
            "email" => Ok(Self::Email),
            "token" => Ok(Self::Token),
            other => Err(AuthError::MethodNotFound(other.to_string())),
        }
    }
}

/// A catalog entry. Lower `priority` is tried first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthMethod {
    #[serde(rename = "type")]
    pub method_type: AuthMethodType,
    pub priority: i32,
    pub is_available: bool,
}

impl AuthMethod {
    #[must_use]
    pub fn new(method_type: AuthMethodType, priority: i32) -> Self {
        Self { method_type, priority, is_available: true }
    }

    #[must_use]
    pub fn unavailable(mut self) -> Self {
        self.is_available = false;
        self
    }

    /// Catalog used when none is supplied.
    #[must_use]
    pub fn default_catalog() -> Vec<AuthMethod> {
        vec![
            AuthMethod::new(AuthMethodType::Firebase, 1),
            AuthMethod::new(AuthMethodType::Phone, 2),
            AuthMethod::new(AuthMethodType::Email, 3),
            AuthMethod::new(AuthMethodType::Token, 4),
        ]
    }
}

/// What the caller supplies; which fields matter depends on the method.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub token: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    /// One-time verification code for two-phase methods
    pub code: Option<String>,
}

impl Credentials {
    #[must_use]
    pub fn token(token: impl Into<String>) -> Self {
        Self { token: Some(token.into()), ..Default::default() }
    }

    #[must_use]
    pub fn phone(phone: impl Into<String>) -> Self {
        Self { phone: Some(phone.into()), ..Default::default() }
    }

    #[must_use]
    pub fn email(email: impl Into<String>) -> Self {
        Self { email: Some(email.into()), ..Default::default() }
    }

    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// The credential field `method` consumes, if supplied.
    #[must_use]
    pub fn identifier_for(&self, method: AuthMethodType) -> Option<&str> {
        let field = match method {
            AuthMethodType::Firebase | AuthMethodType::Token => &self.token,
            AuthMethodType::Phone => &self.phone,
            AuthMethodType::Email => &self.email,
        };
        field.as_deref().filter(|v| !v.trim().is_empty())
    }
}

/// Authenticated user as returned by a verification endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Any further claims the endpoint returns
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Where a verification code was dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationData {
    pub contact: String,
    pub method: AuthMethodType,
}

impl VerificationData {
    #[must_use]
    pub fn phone(&self) -> Option<&str> {
        (self.method == AuthMethodType::Phone).then_some(self.contact.as_str())
    }

    #[must_use]
    pub fn email(&self) -> Option<&str> {
        (self.method == AuthMethodType::Email).then_some(self.contact.as_str())
    }
}

/// Failure detail carried by an [`AuthOutcome`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthFailure {
    pub kind: AuthErrorKind,
    /// Localized, user-facing message
    pub message: String,
    /// Underlying cause, for logs
    pub detail: String,
}

/// Result of one authentication call. Failures are values, never panics
/// or errors, so the UI can render a per-method message.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthOutcome {
    pub success: bool,
    /// `None` only when the requested name matched no known method
    pub method: Option<AuthMethodType>,
    pub user: Option<AuthUser>,
    pub requires_verification: bool,
    pub verification_data: Option<VerificationData>,
    pub error: Option<AuthFailure>,
}

impl AuthOutcome {
    pub(crate) fn authenticated(method: AuthMethodType, user: AuthUser) -> Self {
        Self {
            success: true,
            method: Some(method),
            user: Some(user),
            requires_verification: false,
            verification_data: None,
            error: None,
        }
    }

    /// Outcome for a dispatched code. The `VerificationRequired` failure it
    /// carries tells the UI what to render; it is not a fault.
    pub(crate) fn challenge_sent(method: AuthMethodType, contact: &str, locale: Locale) -> Self {
        let signal = AuthError::VerificationRequired { method, contact: contact.to_string() };
        Self {
            requires_verification: true,
            verification_data: Some(VerificationData { contact: contact.to_string(), method }),
            ..Self::failed(method, &signal, locale)
        }
    }

    pub(crate) fn failed(method: AuthMethodType, error: &AuthError, locale: Locale) -> Self {
        Self { method: Some(method), ..Self::unrecognized(error, locale) }
    }

    /// Failure for a request that named no known method.
    pub(crate) fn unrecognized(error: &AuthError, locale: Locale) -> Self {
        let kind = error.kind();
        Self {
            success: false,
            method: None,
            user: None,
            requires_verification: false,
            verification_data: None,
            error: Some(AuthFailure {
                kind,
                message: kind.message(locale).to_string(),
                detail: error.to_string(),
            }),
        }
    }

    #[must_use]
    pub fn error_kind(&self) -> Option<AuthErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

/// Per-call restrictions.
#[derive(Debug, Clone, Default)]
pub struct AuthOptions {
    /// When set, only these methods may be used for this call
    pub available_methods: Option<Vec<AuthMethodType>>,
}

impl AuthOptions {
    #[must_use]
    pub fn only(methods: impl IntoIterator<Item = AuthMethodType>) -> Self {
        Self { available_methods: Some(methods.into_iter().collect()) }
    }

    pub(crate) fn permits(&self, method: AuthMethodType) -> bool {
        self.available_methods
            .as_ref()
            .map_or(true, |allowed| allowed.contains(&method))
    }
}

/// State of one two-phase flow (per method and contact).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FlowState {
    #[default]
    NotStarted,
    /// A code was dispatched at `sent_at` (epoch millis)
    ChallengeSent { sent_at: i64 },
    Verified { user_id: String },
    /// Last code was rejected; the challenge is still outstanding
    Failed { reason: String },
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "NotStarted"),
            Self::ChallengeSent { .. } => write!(f, "ChallengeSent"),
            Self::Verified { .. } => write!(f, "Verified"),
            Self::Failed { .. } => write!(f, "Failed"),
        }
    }
}

/// One step of [`authenticate_with_fallback`](super::AuthFallbackManager::authenticate_with_fallback).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthAttempt {
    pub method: AuthMethodType,
    pub success: bool,
    pub error: Option<AuthErrorKind>,
}

/// Outcome of walking the chain plus every attempt made on the way.
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackOutcome {
    /// Last outcome reached, `None` when no method could be attempted
    pub outcome: Option<AuthOutcome>,
    pub attempts: Vec<AuthAttempt>,
}

impl FallbackOutcome {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.outcome.as_ref().is_some_and(|o| o.success)
    }

    #[must_use]
    pub fn user(&self) -> Option<&AuthUser> {
        self.outcome.as_ref().and_then(|o| o.user.as_ref())
    }
}

/// Language of user-facing messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    En,
    Es,
}
