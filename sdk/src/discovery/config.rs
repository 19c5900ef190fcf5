//! Discovery configuration.
//!
//! Provides the request options for the HTTP endpoint discovery call.

use std::time::Duration;

use reqwest::Method;
use serde_json::Value;

use crate::error::SessionError;

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default maximum retries (discovery is not retried unless asked to).
pub const DEFAULT_MAX_RETRIES: u32 = 0;

/// Default path of the disconnect notice, relative to the socket endpoint.
pub const DEFAULT_DISCONNECT_PATH: &str = "_socket/disconnect";

/// Default query parameter carrying the identity in the disconnect notice.
pub const DEFAULT_DISCONNECT_PARAM: &str = "identity";

/// Discovery configuration.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Discovery URL.
    pub url: String,

    /// HTTP method.
    pub method: Method,

    /// Query parameters appended to the URL.
    pub query: Vec<(String, String)>,

    /// Extra request headers.
    pub headers: Vec<(String, String)>,

    /// Optional JSON request body.
    pub body: Option<Value>,

    /// Request timeout.
    pub timeout: Duration,

    /// Maximum number of retries for timed out requests.
    pub max_retries: u32,

    /// User agent string.
    pub user_agent: String,

    /// Path of the disconnect notice on the socket endpoint.
    pub disconnect_path: String,

    /// Query parameter carrying the identity in the disconnect notice.
    pub disconnect_param: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            method: Method::GET,
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            user_agent: format!("switchboard-sdk/{}", env!("CARGO_PKG_VERSION")),
            disconnect_path: DEFAULT_DISCONNECT_PATH.to_string(),
            disconnect_param: DEFAULT_DISCONNECT_PARAM.to_string(),
        }
    }
}

impl DiscoveryConfig {
    /// Creates a new configuration with the given discovery URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Sets the HTTP method.
    #[must_use]
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Adds a query parameter.
    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Adds a request header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the JSON request body.
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the maximum number of retries.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the user agent.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Sets the disconnect notice path.
    #[must_use]
    pub fn with_disconnect_path(mut self, path: impl Into<String>) -> Self {
        self.disconnect_path = path.into();
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.url.is_empty() {
            return Err(SessionError::InvalidConfig(
                "discovery url cannot be empty".to_string(),
            ));
        }

        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err(SessionError::InvalidConfig(
                "discovery url must start with http:// or https://".to_string(),
            ));
        }

        if self.disconnect_param.is_empty() {
            return Err(SessionError::InvalidConfig(
                "disconnect_param cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}
