// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Verification endpoint client.
//!
//! Every endpoint takes a JSON body and answers either `{"user": {...}}`,
//! `{"success": true}` (challenge dispatch) or `{"error": "..."}`.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::types::AuthUser;
use crate::transport::{build_client, parse_base, resolve, TransportError};

/// Remote operations used by the fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthEndpoint {
    VerifyToken,
    VerifyFirebaseToken,
    PhoneSendCode,
    PhoneVerifyCode,
    EmailSendCode,
    EmailVerifyCode,
}

impl AuthEndpoint {
    #[must_use]
    pub fn path(&self) -> &'static str {
        match self {
            Self::VerifyToken => "/api/auth/verify-token",
            Self::VerifyFirebaseToken => "/api/auth/verify-firebase-token",
            Self::PhoneSendCode => "/api/auth/phone/send-code",
            Self::PhoneVerifyCode => "/api/auth/phone/verify-code",
            Self::EmailSendCode => "/api/auth/email/send-code",
            Self::EmailVerifyCode => "/api/auth/email/verify-code",
        }
    }
}

/// Decoded endpoint answer.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AuthResponse {
    #[serde(default)]
    pub user: Option<AuthUser>,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub error: Option<String>,
}

impl AuthResponse {
    #[must_use]
    pub fn user(user: AuthUser) -> Self {
        Self { user: Some(user), ..Default::default() }
    }

    #[must_use]
    pub fn sent() -> Self {
        Self { success: Some(true), ..Default::default() }
    }

    #[must_use]
    pub fn rejected(error: impl Into<String>) -> Self {
        Self { error: Some(error.into()), ..Default::default() }
    }
}

#[async_trait]
pub trait AuthTransport: Send + Sync {
    /// POST `body` to `endpoint`. An `{"error"}` answer is a successful
    /// exchange; only failures to get an answer are errors.
    async fn post(&self, endpoint: AuthEndpoint, body: Value) -> Result<AuthResponse, TransportError>;
}

/// [`AuthTransport`] over HTTP.
pub struct HttpAuthTransport {
    client: reqwest::Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpAuthTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: parse_base(base_url)?,
            timeout,
        })
    }
}

#[async_trait]
impl AuthTransport for HttpAuthTransport {
    async fn post(&self, endpoint: AuthEndpoint, body: Value) -> Result<AuthResponse, TransportError> {
        let url = resolve(Some(&self.base_url), endpoint.path())?;
        debug!(%url, "POST auth endpoint");

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(e, self.timeout))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| TransportError::from_reqwest(e, self.timeout))?;

        // Rejections (wrong code, bad token) usually come back as 4xx with an
        // error body; those are answers, not transport faults.
        let parsed = serde_json::from_str::<AuthResponse>(&text);
        if !status.is_success() {
            return match parsed {
                Ok(answer) if answer.error.is_some() => Ok(answer),
                _ => Err(TransportError::Status { status: status.as_u16(), body: text }),
            };
        }
        parsed.map_err(|e| TransportError::Decode(e.to_string()))
    }
}
