//! Lazily established, authenticated Graph session.
//!
//! The manager owns the configuration, runs the configured credential
//! strategy on first use and keeps the resulting clients. Once a session
//! exists, `ensure_session(false)` returns immediately without checking
//! token freshness; token renewal happens per request in the provider.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::auth::{self, AccessTokenProvider, StrategyContext, UrlOpener};
use crate::client::GraphClient;
use crate::config::{AuthMethod, Config};
use crate::error::GraphError;
use crate::models::ConnectionType;
use crate::net::{ChaosInjector, HttpClient};
use crate::retry::RetryPolicy;

/// An established session: one token provider, two clients.
pub struct Session {
    api: GraphClient,
    transfer: GraphClient,
    method: AuthMethod,
    established_at: DateTime<Utc>,
}

impl Session {
    fn new(config: &Config, provider: Arc<dyn AccessTokenProvider>) -> Self {
        let base = config.auth.api_base();
        let retry = RetryPolicy::from(&config.retry);
        let chaos = ChaosInjector::from_config(&config.chaos);
        if let Some(chaos) = &chaos {
            warn!(percent = chaos.percent(), "Chaos injection enabled");
        }

        let api = GraphClient::new(HttpClient::api(&config.http), base.clone(), provider.clone())
            .with_retry(retry.clone())
            .with_chaos(chaos);
        let transfer = GraphClient::new(HttpClient::transfer(&config.http), base, provider)
            .with_retry(retry)
            .with_chaos(chaos);

        Self {
            api,
            transfer,
            method: config.auth.method,
            established_at: Utc::now(),
        }
    }

    pub fn client(&self) -> &GraphClient {
        &self.api
    }

    /// Client with the extended timeout for large transfers.
    pub fn transfer_client(&self) -> &GraphClient {
        &self.transfer
    }

    pub fn provider(&self) -> &Arc<dyn AccessTokenProvider> {
        self.api.provider()
    }

    pub fn method(&self) -> AuthMethod {
        self.method
    }

    pub fn established_at(&self) -> DateTime<Utc> {
        self.established_at
    }
}

pub struct SessionManager {
    config: Arc<Config>,
    ctx: StrategyContext,
    session: RwLock<Option<Arc<Session>>>,
    init_lock: Mutex<()>,
    connection: RwLock<Option<ConnectionType>>,
}

impl SessionManager {
    pub fn new(config: Config) -> Self {
        let http = HttpClient::api(&config.http);
        Self {
            config: Arc::new(config),
            ctx: StrategyContext::new(http.inner().clone()),
            session: RwLock::new(None),
            init_lock: Mutex::new(()),
            connection: RwLock::new(None),
        }
    }

    /// Where the interactive strategy sends the sign-in URL.
    pub fn with_url_opener(mut self, opener: Arc<dyn UrlOpener>) -> Self {
        self.ctx = self.ctx.with_url_opener(opener);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Establish a session unless one exists (or `force_reinit` is set).
    ///
    /// Returns `Ok(true)` when a session is available afterwards. A failed
    /// re-initialization leaves any previous session in place.
    pub async fn ensure_session(&self, force_reinit: bool) -> Result<bool, GraphError> {
        self.ensure_session_with(force_reinit, &CancellationToken::new())
            .await
    }

    /// [`ensure_session`](Self::ensure_session) with a caller-owned
    /// cancellation token, e.g. to abort a pending interactive sign-in.
    pub async fn ensure_session_with(
        &self,
        force_reinit: bool,
        cancel: &CancellationToken,
    ) -> Result<bool, GraphError> {
        if !force_reinit && self.session.read().await.is_some() {
            return Ok(true);
        }

        let _guard = self.init_lock.lock().await;
        if !force_reinit && self.session.read().await.is_some() {
            return Ok(true);
        }

        let method = self.config.auth.method;
        let strategy = auth::strategy_for(&self.config, &self.ctx).inspect_err(|e| {
            error!(%method, error = %e, "Invalid session configuration");
        })?;

        let provider = strategy.authenticate(cancel).await.inspect_err(|e| {
            error!(%method, error = %e, "Failed to establish session");
        })?;

        let session = Arc::new(Session::new(&self.config, provider));
        *self.session.write().await = Some(session);

        info!(%method, forced = force_reinit, "Session established");
        Ok(true)
    }

    pub async fn is_connected(&self) -> bool {
        self.session.read().await.is_some()
    }

    pub async fn session(&self) -> Option<Arc<Session>> {
        self.session.read().await.clone()
    }

    pub async fn client(&self) -> Result<GraphClient, GraphError> {
        self.session()
            .await
            .map(|s| s.client().clone())
            .ok_or(GraphError::NotConnected)
    }

    pub async fn transfer_client(&self) -> Result<GraphClient, GraphError> {
        self.session()
            .await
            .map(|s| s.transfer_client().clone())
            .ok_or(GraphError::NotConnected)
    }

    /// Ensure a session and record which workload it serves.
    pub async fn open_connection(&self, kind: ConnectionType) -> Result<bool, GraphError> {
        self.ensure_session(false).await?;
        *self.connection.write().await = Some(kind);
        info!(connection = %kind, "Connection opened");
        Ok(true)
    }

    pub async fn connection_type(&self) -> Option<ConnectionType> {
        *self.connection.read().await
    }

    /// Drop the session. The next `ensure_session` authenticates again.
    pub async fn disconnect(&self) {
        let _guard = self.init_lock.lock().await;
        *self.session.write().await = None;
        *self.connection.write().await = None;
        info!("Session closed");
    }
}
