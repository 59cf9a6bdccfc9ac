//! Token pair obtained outside this process and kept in the encrypted token file.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::error::AuthError;
use super::{AccessTokenProvider, CredentialStrategy};
use crate::config::{AuthConfig, AuthMethod};
use crate::error::GraphError;
use crate::token::{RefreshTokenRenewal, TokenCache, TokenEndpoint, TokenStorage};

pub struct ExternalJwtStrategy {
    storage: Arc<dyn TokenStorage>,
    endpoint: TokenEndpoint,
    client_id: String,
}

impl ExternalJwtStrategy {
    pub fn new(auth: &AuthConfig, http: reqwest::Client, storage: Arc<dyn TokenStorage>) -> Self {
        Self {
            storage,
            endpoint: TokenEndpoint::new(http, auth.token_endpoint()),
            client_id: auth.client_id.clone(),
        }
    }
}

#[async_trait]
impl CredentialStrategy for ExternalJwtStrategy {
    fn method(&self) -> AuthMethod {
        AuthMethod::ExternalJwt
    }

    /// Load the stored pair. No network call happens here; the first
    /// `access_token()` refreshes if the stored token is near expiry.
    async fn authenticate(
        &self,
        _cancel: &CancellationToken,
    ) -> Result<Arc<dyn AccessTokenProvider>, GraphError> {
        let renewal = RefreshTokenRenewal::new(self.endpoint.clone(), self.client_id.clone());
        let cache = TokenCache::new(Arc::new(renewal)).with_storage(self.storage.clone());

        if !cache.load_from_storage().await? {
            error!(source = self.storage.name(), "No stored token to authenticate with");
            return Err(AuthError::NoToken.into());
        }

        let state = cache.state().await;
        info!(?state, "Loaded external token");
        Ok(Arc::new(cache))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::test_support::jwt_expiring_in;
    use crate::token::{BearerToken, MemoryTokenStorage};

    #[tokio::test]
    async fn test_missing_token_file() {
        let strategy = ExternalJwtStrategy::new(
            &AuthConfig::default(),
            reqwest::Client::new(),
            Arc::new(MemoryTokenStorage::new()),
        );
        let err = strategy
            .authenticate(&CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, GraphError::Auth(AuthError::NoToken)));
    }

    #[tokio::test]
    async fn test_fresh_token_served_without_network() {
        let access = jwt_expiring_in(3600);
        let storage = MemoryTokenStorage::with_token(BearerToken::new(access.clone(), Some("r".into())));
        let strategy = ExternalJwtStrategy::new(
            &AuthConfig::default(),
            reqwest::Client::new(),
            Arc::new(storage),
        );

        let provider = strategy.authenticate(&CancellationToken::new()).await.unwrap();
        assert_eq!(provider.access_token().await.unwrap(), access);
    }

    #[tokio::test]
    async fn test_authenticate_runs_on_spawned_task() {
        let storage = MemoryTokenStorage::with_token(BearerToken::new(
            jwt_expiring_in(3600),
            Some("r".into()),
        ));
        let strategy = ExternalJwtStrategy::new(
            &AuthConfig::default(),
            reqwest::Client::new(),
            Arc::new(storage),
        );

        let provider = tokio::spawn(async move {
            strategy.authenticate(&CancellationToken::new()).await
        })
        .await
        .unwrap()
        .unwrap();
        assert_eq!(provider.name(), "refresh_token");
    }
}
