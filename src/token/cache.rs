//! Token lifecycle: caching, single-flight renewal and persistence.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::storage::TokenStorage;
use super::{BearerToken, REFRESH_THRESHOLD, TokenEndpoint, TokenState};
use crate::auth::AccessTokenProvider;
use crate::auth::error::AuthError;
use crate::error::GraphError;

/// How a cache obtains a replacement token.
#[async_trait]
pub trait TokenRenewal: Send + Sync {
    /// Produce a new token. `current` is the token being replaced, if any.
    async fn renew(&self, current: Option<&BearerToken>) -> Result<BearerToken, GraphError>;

    fn name(&self) -> &str;
}

/// Renewal by redeeming the current token's refresh token.
#[derive(Debug, Clone)]
pub struct RefreshTokenRenewal {
    endpoint: TokenEndpoint,
    client_id: String,
}

impl RefreshTokenRenewal {
    pub fn new(endpoint: TokenEndpoint, client_id: impl Into<String>) -> Self {
        Self {
            endpoint,
            client_id: client_id.into(),
        }
    }
}

#[async_trait]
impl TokenRenewal for RefreshTokenRenewal {
    async fn renew(&self, current: Option<&BearerToken>) -> Result<BearerToken, GraphError> {
        let current = current.ok_or(AuthError::NoToken)?;
        let refresh_token = current
            .refresh_token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or(AuthError::NoRefreshToken)?;

        let mut renewed = self.endpoint.refresh(&self.client_id, refresh_token).await?;

        // Keep the old refresh token when the endpoint does not rotate it
        if !renewed.has_refresh_token() {
            renewed.refresh_token = Some(refresh_token.to_string());
        }
        Ok(renewed)
    }

    fn name(&self) -> &str {
        "refresh_token"
    }
}

/// Holds the session's single bearer token and renews it on demand.
///
/// Readers take the `RwLock` only long enough to clone the token. Renewal
/// is serialized by `refresh_lock`, and a caller that waited on it re-checks
/// the token first, so concurrent callers trigger one network refresh.
pub struct TokenCache {
    token: RwLock<Option<BearerToken>>,
    refresh_lock: Mutex<()>,
    renewal: Arc<dyn TokenRenewal>,
    storage: Option<Arc<dyn TokenStorage>>,
    threshold: Duration,
}

impl TokenCache {
    pub fn new(renewal: Arc<dyn TokenRenewal>) -> Self {
        Self {
            token: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            renewal,
            storage: None,
            threshold: REFRESH_THRESHOLD,
        }
    }

    /// Persist every renewed token to `storage`.
    pub fn with_storage(mut self, storage: Arc<dyn TokenStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_threshold(mut self, threshold: Duration) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_token(self, token: BearerToken) -> Self {
        Self {
            token: RwLock::new(Some(token)),
            ..self
        }
    }

    /// Seed the cache from storage. Returns `true` when a token was found.
    pub async fn load_from_storage(&self) -> Result<bool, GraphError> {
        let Some(storage) = &self.storage else {
            return Ok(false);
        };
        let loader = storage.clone();
        let loaded = tokio::task::spawn_blocking(move || loader.load())
            .await
            .map_err(|e| GraphError::Storage(format!("token load task failed: {e}")))??;
        match loaded {
            Some(token) => {
                info!(source = storage.name(), "Loaded token from storage");
                *self.token.write().await = Some(token);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Snapshot of the current token, fresh or not.
    pub async fn current(&self) -> Option<BearerToken> {
        self.token.read().await.clone()
    }

    pub async fn state(&self) -> Option<TokenState> {
        self.token
            .read()
            .await
            .as_ref()
            .map(|t| t.state(self.threshold))
    }

    /// Current token, renewed first if it is missing or near expiry.
    pub async fn valid_token(&self) -> Result<BearerToken, GraphError> {
        if let Some(token) = self.fresh_token().await {
            return Ok(token);
        }

        let _guard = self.refresh_lock.lock().await;

        // Another task may have renewed while we waited for the lock
        if let Some(token) = self.fresh_token().await {
            debug!("Token renewed by a concurrent caller");
            return Ok(token);
        }

        self.renew_locked().await
    }

    /// Renew unconditionally, e.g. after the API rejected the token.
    pub async fn force_refresh(&self) -> Result<BearerToken, GraphError> {
        info!(renewal = self.renewal.name(), "Force refresh requested");
        let _guard = self.refresh_lock.lock().await;
        self.renew_locked().await
    }

    /// Install `token` as current and persist it.
    pub async fn replace(&self, token: BearerToken) {
        let _guard = self.refresh_lock.lock().await;
        self.persist(&token).await;
        *self.token.write().await = Some(token);
    }

    async fn fresh_token(&self) -> Option<BearerToken> {
        let guard = self.token.read().await;
        guard
            .as_ref()
            .filter(|t| !t.access_token.is_empty() && t.state(self.threshold) == TokenState::Valid)
            .cloned()
    }

    /// Caller must hold `refresh_lock`.
    async fn renew_locked(&self) -> Result<BearerToken, GraphError> {
        let current = self.current().await;
        debug!(
            renewal = self.renewal.name(),
            has_token = current.is_some(),
            "Renewing token"
        );

        let renewed = match self.renewal.renew(current.as_ref()).await {
            Ok(token) => token,
            Err(e) => {
                error!(renewal = self.renewal.name(), error = %e, "Token renewal failed");
                return Err(match e {
                    GraphError::Auth(_) | GraphError::Throttled { .. } | GraphError::Cancelled => e,
                    other => AuthError::RefreshFailed(other.to_string()).into(),
                });
            }
        };

        self.persist(&renewed).await;
        *self.token.write().await = Some(renewed.clone());

        info!(
            renewal = self.renewal.name(),
            expires_at = ?renewed.expires_at(),
            "Token renewed"
        );
        Ok(renewed)
    }

    /// Save on the blocking pool; the file backend fsyncs. Awaited so saves
    /// stay ordered under `refresh_lock`.
    async fn persist(&self, token: &BearerToken) {
        let Some(storage) = &self.storage else {
            return;
        };
        let writer = storage.clone();
        let token = token.clone();
        let result = tokio::task::spawn_blocking(move || writer.save(&token))
            .await
            .map_err(|e| GraphError::Storage(format!("token save task failed: {e}")))
            .and_then(|saved| saved);
        if let Err(e) = result {
            warn!(source = storage.name(), error = %e, "Failed to persist token");
        }
    }
}

#[async_trait]
impl AccessTokenProvider for TokenCache {
    async fn access_token(&self) -> Result<String, GraphError> {
        Ok(self.valid_token().await?.access_token)
    }

    async fn invalidate(&self) -> Result<(), GraphError> {
        self.force_refresh().await.map(|_| ())
    }

    fn name(&self) -> &str {
        self.renewal.name()
    }
}
