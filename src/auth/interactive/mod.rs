//! Delegated sign-in: authorization code + PKCE with a loopback redirect.

pub mod loopback;
pub mod pkce;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use self::loopback::LoopbackListener;
use self::pkce::{CHALLENGE_METHOD, PkcePair};
use super::error::AuthError;
use super::{AccessTokenProvider, CredentialStrategy, UrlOpener};
use crate::config::{AuthConfig, AuthMethod, InteractiveConfig};
use crate::error::GraphError;
use crate::token::{EncryptedFileStorage, RefreshTokenRenewal, TokenCache, TokenEndpoint};

pub struct InteractiveStrategy {
    auth: AuthConfig,
    settings: InteractiveConfig,
    http: reqwest::Client,
    opener: Arc<dyn UrlOpener>,
}

impl InteractiveStrategy {
    pub fn new(
        auth: AuthConfig,
        settings: InteractiveConfig,
        http: reqwest::Client,
        opener: Arc<dyn UrlOpener>,
    ) -> Self {
        Self {
            auth,
            settings,
            http,
            opener,
        }
    }

    /// Authorize URL for the configured scopes.
    pub fn authorize_url(&self, redirect_uri: &str, state: &str, challenge: &str) -> String {
        let scope = self.settings.scopes.join(" ");
        format!(
            "{}?client_id={}&response_type=code&redirect_uri={}&response_mode=query&scope={}&state={}&code_challenge={}&code_challenge_method={}",
            self.auth.authorize_endpoint(),
            urlencoding::encode(&self.auth.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(&scope),
            urlencoding::encode(state),
            urlencoding::encode(challenge),
            CHALLENGE_METHOD,
        )
    }

    fn storage(&self) -> Option<EncryptedFileStorage> {
        if !self.settings.persist_token {
            return None;
        }
        match EncryptedFileStorage::from_config(&self.auth) {
            Ok(storage) => Some(storage),
            Err(e) => {
                warn!(error = %e, "Token file unavailable; signed-in token will not be persisted");
                None
            }
        }
    }
}

#[async_trait]
impl CredentialStrategy for InteractiveStrategy {
    fn method(&self) -> AuthMethod {
        AuthMethod::Interactive
    }

    async fn authenticate(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn AccessTokenProvider>, GraphError> {
        let listener = LoopbackListener::bind(self.settings.redirect_port).await?;
        let redirect_uri = listener.redirect_uri();
        let pkce = PkcePair::generate();
        let state = uuid::Uuid::new_v4().simple().to_string();

        self.opener
            .open(&self.authorize_url(&redirect_uri, &state, &pkce.challenge))?;
        info!(%redirect_uri, "Waiting for interactive sign-in");

        let timeout = Duration::from_secs(self.settings.timeout_secs);
        let code = tokio::select! {
            _ = cancel.cancelled() => {
                info!("Interactive sign-in cancelled");
                return Err(GraphError::Cancelled);
            }
            waited = tokio::time::timeout(timeout, listener.wait_for_code(&state)) => {
                waited.map_err(|_| AuthError::FlowExpired)??
            }
        };

        // Cancellation abandons the exchange but cannot abort a request already sent
        let endpoint = TokenEndpoint::new(self.http.clone(), self.auth.token_endpoint());
        let exchange = {
            let endpoint = endpoint.clone();
            let form = [
                ("grant_type", "authorization_code".to_string()),
                ("client_id", self.auth.client_id.clone()),
                ("code", code),
                ("redirect_uri", redirect_uri),
                ("code_verifier", pkce.verifier),
                ("scope", self.settings.scopes.join(" ")),
            ];
            tokio::spawn(async move {
                let form: Vec<(&str, &str)> = form.iter().map(|(k, v)| (*k, v.as_str())).collect();
                endpoint.request("authorization_code", &form).await
            })
        };

        let token = tokio::select! {
            _ = cancel.cancelled() => {
                warn!("Cancelled during code exchange; the in-flight request may still complete");
                return Err(GraphError::Cancelled);
            }
            joined = exchange => joined
                .map_err(|e| AuthError::ExchangeFailed(format!("exchange task failed: {e}")))??,
        };

        if !token.has_refresh_token() {
            warn!("Sign-in returned no refresh token; the session ends when the access token expires");
        }

        let renewal = RefreshTokenRenewal::new(endpoint, self.auth.client_id.clone());
        let mut cache = TokenCache::new(Arc::new(renewal));
        if let Some(storage) = self.storage() {
            cache = cache.with_storage(Arc::new(storage));
        }
        cache.replace(token).await;

        info!("Interactive sign-in complete");
        Ok(Arc::new(cache))
    }
}
