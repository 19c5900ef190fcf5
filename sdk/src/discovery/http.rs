//! HTTP discovery implementation.
//!
//! Asks the backend which port its socket listens on, and delivers the
//! disconnect notice when a session ends on purpose.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Url;
use tracing::{debug, warn};

use super::config::DiscoveryConfig;
use super::response::DiscoveryResponse;
use super::{Discovery, DiscoveryReply, Endpoint};
use crate::error::SessionError;

/// Discovery over HTTP.
#[derive(Debug, Clone)]
pub struct HttpDiscovery {
    config: DiscoveryConfig,
    http: reqwest::Client,
}

impl HttpDiscovery {
    /// Creates a new discovery client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the HTTP client
    /// cannot be created.
    pub fn new(config: DiscoveryConfig) -> Result<Self, SessionError> {
        config.validate()?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| SessionError::InvalidConfig(format!("header {}: {}", name, e)))?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                SessionError::InvalidConfig(format!("header {}: {}", name.as_str(), e))
            })?;
            headers.insert(name, value);
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| SessionError::InvalidConfig(e.to_string()))?;

        Ok(Self { config, http })
    }

    /// Creates a new discovery client for the given URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_url(url: impl Into<String>) -> Result<Self, SessionError> {
        Self::new(DiscoveryConfig::new(url))
    }

    /// Returns the discovery configuration.
    #[must_use]
    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    fn discovery_url(&self) -> Result<Url, SessionError> {
        Url::parse_with_params(&self.config.url, &self.config.query)
            .map_err(|e| SessionError::InvalidConfig(format!("discovery url: {}", e)))
    }

    fn request(&self, url: &Url) -> reqwest::RequestBuilder {
        let builder = self.http.request(self.config.method.clone(), url.clone());
        match &self.config.body {
            Some(body) => builder.json(body),
            None => builder,
        }
    }
}

/// Largest backoff exponent; later retries keep waiting 102.4s.
const MAX_BACKOFF_SHIFT: u32 = 10;

/// Backoff before retry number `retry` (starting at 1).
fn retry_delay(retry: u32) -> Duration {
    Duration::from_millis(100 << retry.min(MAX_BACKOFF_SHIFT))
}

#[async_trait]
impl Discovery for HttpDiscovery {
    async fn discover(&self) -> Result<DiscoveryReply, SessionError> {
        let url = self.discovery_url()?;
        let mut retry_count = 0;

        loop {
            let response = match self.request(&url).send().await {
                Ok(response) => response,
                Err(e) if e.is_timeout() && retry_count < self.config.max_retries => {
                    retry_count += 1;
                    warn!(url = %url, retry = retry_count, "discovery timed out, retrying");
                    tokio::time::sleep(retry_delay(retry_count)).await;
                    continue;
                }
                Err(e) => return Err(SessionError::from(e)),
            };

            let status = response.status();
            // the host that finally answered, after redirects
            let answered = response.url().clone();
            let body = response
                .text()
                .await
                .map_err(|e| SessionError::Discovery(e.to_string()))?;

            if !status.is_success() {
                return Err(SessionError::Discovery(format!(
                    "HTTP {}: {}",
                    status.as_u16(),
                    body
                )));
            }

            let body: DiscoveryResponse = serde_json::from_str(&body)
                .map_err(|e| SessionError::MalformedDiscovery(e.to_string()))?;

            debug!(url = %answered, "discovery answered");

            return Ok(DiscoveryReply {
                host: answered.host_str().map(String::from),
                secure: answered.scheme() == "https",
                body,
            });
        }
    }

    async fn notify_disconnect(
        &self,
        endpoint: &Endpoint,
        identity: &str,
    ) -> Result<(), SessionError> {
        let url = Url::parse_with_params(
            &endpoint.http_url(&self.config.disconnect_path),
            [(self.config.disconnect_param.as_str(), identity)],
        )
        .map_err(|e| SessionError::InvalidConfig(format!("disconnect url: {}", e)))?;

        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(SessionError::Discovery(format!(
                "disconnect notice rejected: HTTP {}",
                response.status().as_u16()
            )));
        }

        Ok(())
    }
}
