//! Bearer-authenticated Graph requests with throttling-aware retry.

use std::sync::Arc;

use reqwest::{Method, Response};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::auth::AccessTokenProvider;
use crate::error::GraphError;
use crate::net::{ChaosInjector, HttpClient};
use crate::retry::{RetryError, RetryPolicy, execute_with_retry};

/// Executes Graph API calls for one session.
///
/// Every attempt asks the provider for a token, so a renewal between
/// retries is picked up automatically.
#[derive(Clone)]
pub struct GraphClient {
    http: HttpClient,
    base_url: String,
    provider: Arc<dyn AccessTokenProvider>,
    retry: RetryPolicy,
    chaos: Option<ChaosInjector>,
}

impl GraphClient {
    pub fn new(
        http: HttpClient,
        base_url: impl Into<String>,
        provider: Arc<dyn AccessTokenProvider>,
    ) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self {
            http,
            base_url,
            provider,
            retry: RetryPolicy::default(),
            chaos: None,
        }
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn with_chaos(mut self, chaos: Option<ChaosInjector>) -> Self {
        self.chaos = chaos;
        self
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    pub fn provider(&self) -> &Arc<dyn AccessTokenProvider> {
        &self.provider
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Absolute URLs (e.g. `@odata.nextLink`) pass through; relative paths
    /// are joined to the API base.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("https://") || path.starts_with("http://") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path.trim_start_matches('/'))
        }
    }

    /// An authorized request builder for callers that drive the request
    /// themselves. No retry is applied.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
    ) -> Result<reqwest::RequestBuilder, GraphError> {
        let builder = self.http.inner().request(method, self.url(path));
        self.provider.authorize(builder).await
    }

    /// Send a request, retrying throttled attempts per the policy.
    #[instrument(skip(self, body, cancel))]
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
        cancel: &CancellationToken,
    ) -> Result<Response, RetryError<GraphError>> {
        let url = self.url(path);
        execute_with_retry(&self.retry, cancel, |attempt| {
            let method = method.clone();
            let url = url.as_str();
            async move {
                debug!(attempt, %url, "Sending Graph request");
                self.attempt(method, url, body).await
            }
        })
        .await
    }

    /// GET `path` and deserialize the JSON body.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<T, GraphError> {
        let response = self.send(Method::GET, path, None, cancel).await?;
        Ok(response.json::<T>().await?)
    }

    async fn attempt(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Response, GraphError> {
        if let Some(failure) = self.chaos.as_ref().and_then(ChaosInjector::maybe_fail) {
            return Err(failure);
        }

        let mut builder = self.http.inner().request(method, url);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        let response = self.provider.authorize(builder).await?.send().await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let headers = response.headers().clone();
        let text = response.text().await.unwrap_or_default();
        Err(GraphError::from_response(status, &headers, &text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticToken;

    #[async_trait::async_trait]
    impl AccessTokenProvider for StaticToken {
        async fn access_token(&self) -> Result<String, GraphError> {
            Ok("static".into())
        }
        async fn invalidate(&self) -> Result<(), GraphError> {
            Ok(())
        }
        fn name(&self) -> &str {
            "static"
        }
    }

    fn client() -> GraphClient {
        GraphClient::new(
            HttpClient::new(),
            "https://graph.microsoft.com/v1.0",
            Arc::new(StaticToken),
        )
    }

    #[test]
    fn test_url_joining() {
        let client = client();
        assert_eq!(client.url("me/drive"), "https://graph.microsoft.com/v1.0/me/drive");
        assert_eq!(client.url("/sites/root"), "https://graph.microsoft.com/v1.0/sites/root");
        assert_eq!(
            client.url("https://graph.microsoft.com/v1.0/me/drive/root/children?$skiptoken=x"),
            "https://graph.microsoft.com/v1.0/me/drive/root/children?$skiptoken=x"
        );
    }

    #[tokio::test]
    async fn test_request_carries_bearer() {
        let request = client()
            .request(Method::GET, "me")
            .await
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(
            request.headers().get(reqwest::header::AUTHORIZATION).unwrap(),
            "Bearer static"
        );
    }

    #[tokio::test]
    async fn test_full_chaos_exhausts_without_network() {
        let client = client()
            .with_chaos(Some(ChaosInjector::new(100)))
            .with_retry(
                RetryPolicy::new()
                    .with_max_attempts(2)
                    .with_max_delay(std::time::Duration::ZERO),
            );
        let err = client
            .send(Method::GET, "me", None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_exhausted());
    }
}
