//! Configured reqwest clients for the API and for long transfers.

use std::time::Duration;

use reqwest::{Client, ClientBuilder};

use crate::config::HttpConfig;

pub const USER_AGENT: &str = concat!("graph-gate/", env!("CARGO_PKG_VERSION"));

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for ordinary Graph API calls.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(100);

/// Timeout for the transfer client (large file downloads and uploads).
pub const TRANSFER_TIMEOUT: Duration = Duration::from_secs(3 * 60 * 60);

/// reqwest client with the crate's User-Agent and timeouts.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
    timeout: Duration,
}

impl HttpClient {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::default()
    }

    /// Client for ordinary API calls.
    pub fn api(config: &HttpConfig) -> Self {
        Self::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .request_timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
    }

    /// Client with the extended transfer timeout.
    pub fn transfer(config: &HttpConfig) -> Self {
        Self::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .request_timeout(Duration::from_secs(config.transfer_timeout_secs))
            .build()
    }

    pub fn inner(&self) -> &Client {
        &self.inner
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`HttpClient`].
pub struct HttpClientBuilder {
    builder: ClientBuilder,
    timeout: Duration,
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self {
            builder: Client::builder()
                .user_agent(USER_AGENT)
                .connect_timeout(CONNECT_TIMEOUT)
                .timeout(REQUEST_TIMEOUT),
            timeout: REQUEST_TIMEOUT,
        }
    }
}

impl HttpClientBuilder {
    pub fn user_agent(mut self, ua: &str) -> Self {
        self.builder = self.builder.user_agent(ua);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.builder = self.builder.connect_timeout(timeout);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.builder = self.builder.timeout(timeout);
        self.timeout = timeout;
        self
    }

    /// Build the client, falling back to reqwest defaults if the TLS backend
    /// rejects the configuration.
    pub fn build(self) -> HttpClient {
        let inner = match self.builder.build() {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("Failed to build HTTP client with custom config: {}; using defaults", e);
                Client::default()
            }
        };
        HttpClient {
            inner,
            timeout: self.timeout,
        }
    }
}
