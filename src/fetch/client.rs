// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::config::FetchConfig;
use crate::transport::{build_client, parse_base, resolve, TransportError};

/// Source of resource payloads. One call is one attempt; retry and
/// fallback live in the orchestrator.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    async fn get(&self, resource: &str) -> Result<Value, TransportError>;
}

/// [`ResourceClient`] issuing plain GETs. Headers and auth belong to the
/// host, through a custom client if needed.
pub struct HttpResourceClient {
    client: reqwest::Client,
    base_url: Option<Url>,
    timeout: Duration,
}

impl HttpResourceClient {
    pub fn new(config: &FetchConfig) -> Result<Self, TransportError> {
        let base_url = config.base_url.as_deref().map(parse_base).transpose()?;
        Ok(Self {
            client: build_client(config.request_timeout())?,
            base_url,
            timeout: config.request_timeout(),
        })
    }
}

#[async_trait]
impl ResourceClient for HttpResourceClient {
    async fn get(&self, resource: &str) -> Result<Value, TransportError> {
        let url = resolve(self.base_url.as_ref(), resource)?;
        debug!(%url, "GET resource");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status { status: status.as_u16(), body });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))
    }
}
