//! Credential strategies.
//!
//! One strategy per [`AuthMethod`], selected once from configuration by
//! [`strategy_for`]. Each produces an [`AccessTokenProvider`] that the Graph
//! client asks for a bearer token before every request.

pub mod basic;
pub mod client_credentials;
pub mod error;
pub mod external_jwt;
pub mod interactive;
pub mod traits;

use std::sync::Arc;

pub use self::basic::BasicStrategy;
pub use self::client_credentials::{CertificateCredential, ClientCredential, ClientCredentialsStrategy};
pub use self::error::AuthError;
pub use self::external_jwt::ExternalJwtStrategy;
pub use self::interactive::InteractiveStrategy;
pub use self::traits::{AccessTokenProvider, CredentialStrategy, LogUrlOpener, UrlOpener};

use crate::config::{AuthMethod, Config};
use crate::error::GraphError;
use crate::token::EncryptedFileStorage;

/// Runtime collaborators a strategy may need beyond configuration.
#[derive(Clone)]
pub struct StrategyContext {
    pub http: reqwest::Client,
    pub url_opener: Arc<dyn UrlOpener>,
}

impl StrategyContext {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            url_opener: Arc::new(LogUrlOpener),
        }
    }

    pub fn with_url_opener(mut self, opener: Arc<dyn UrlOpener>) -> Self {
        self.url_opener = opener;
        self
    }
}

/// Build the strategy for `config.auth.method`.
///
/// Configuration problems surface here, before any network call.
pub fn strategy_for(
    config: &Config,
    ctx: &StrategyContext,
) -> Result<Box<dyn CredentialStrategy>, GraphError> {
    config.validate()?;
    let auth = &config.auth;

    Ok(match auth.method {
        AuthMethod::Basic => Box::new(BasicStrategy),
        AuthMethod::ClientCredentials => {
            Box::new(ClientCredentialsStrategy::new(auth, ctx.http.clone())?)
        }
        AuthMethod::Interactive => Box::new(InteractiveStrategy::new(
            auth.clone(),
            config.interactive.clone(),
            ctx.http.clone(),
            ctx.url_opener.clone(),
        )),
        AuthMethod::ExternalJwt => {
            let storage = EncryptedFileStorage::from_config(auth)?;
            Box::new(ExternalJwtStrategy::new(
                auth,
                ctx.http.clone(),
                Arc::new(storage),
            ))
        }
    })
}
