//! Shared authentication traits.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::AuthMethod;
use crate::error::GraphError;

/// Source of bearer tokens for Graph requests.
///
/// Implementations renew their token when needed; callers just ask.
#[async_trait::async_trait]
pub trait AccessTokenProvider: Send + Sync {
    /// Get a valid access token.
    async fn access_token(&self) -> Result<String, GraphError>;

    /// Obtain a replacement token now, e.g. after a 401 from the API.
    async fn invalidate(&self) -> Result<(), GraphError>;

    fn name(&self) -> &str;

    /// Attach the bearer token to a request.
    async fn authorize(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder, GraphError> {
        let token = self.access_token().await?;
        Ok(request.bearer_auth(token))
    }
}

/// One way of establishing credentials for a session.
///
/// Strategies run once per session establishment and never retry
/// internally; the session manager decides what to do with a failure.
#[async_trait::async_trait]
pub trait CredentialStrategy: Send + Sync {
    fn method(&self) -> AuthMethod;

    async fn authenticate(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn AccessTokenProvider>, GraphError>;
}

/// Presents the sign-in URL to the user during interactive authentication.
pub trait UrlOpener: Send + Sync {
    fn open(&self, url: &str) -> Result<(), GraphError>;
}

/// Logs the sign-in URL so an operator can open it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogUrlOpener;

impl UrlOpener for LogUrlOpener {
    fn open(&self, url: &str) -> Result<(), GraphError> {
        info!(%url, "Open this URL in a browser to sign in");
        Ok(())
    }
}
