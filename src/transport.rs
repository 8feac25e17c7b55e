// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! HTTP plumbing shared by the fetch orchestrator and the authentication chain.

use std::time::Duration;

use thiserror::Error;
use url::Url;

/// A failed network exchange. Always counts as a failed attempt for retry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP error: status {status}")]
    Status { status: u16, body: String },
    #[error("failed to decode response: {0}")]
    Decode(String),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

impl TransportError {
    pub(crate) fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            Self::Timeout(timeout)
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }

    /// Whether another attempt could succeed. Client errors other than
    /// 408 and 429 and malformed URLs are permanent.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Status { status, .. } => !(400..500).contains(status) || matches!(status, 408 | 429),
            Self::InvalidUrl(_) => false,
            _ => true,
        }
    }

    /// Short label for metrics
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::Network(_) => "network",
            Self::Status { .. } => "status",
            Self::Decode(_) => "decode",
            Self::InvalidUrl(_) => "invalid_url",
        }
    }
}

pub(crate) fn build_client(timeout: Duration) -> Result<reqwest::Client, TransportError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| TransportError::Network(format!("failed to create HTTP client: {}", e)))
}

/// Resolve `path` against `base`. Absolute URLs pass through unchanged.
pub(crate) fn resolve(base: Option<&Url>, path: &str) -> Result<Url, TransportError> {
    if let Ok(url) = Url::parse(path) {
        return Ok(url);
    }
    match base {
        Some(base) => base
            .join(path)
            .map_err(|e| TransportError::InvalidUrl(format!("{}: {}", path, e))),
        None => Err(TransportError::InvalidUrl(format!("{}: relative path without base url", path))),
    }
}

pub(crate) fn parse_base(base: &str) -> Result<Url, TransportError> {
    Url::parse(base).map_err(|e| TransportError::InvalidUrl(format!("{}: {}", base, e)))
}
