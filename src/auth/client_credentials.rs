//! Confidential client credentials (application permissions).
//!
//! The client proves its identity with either a shared secret or a signed
//! JWT assertion made from its certificate. The resulting token is for the
//! `{api_url}/.default` scope and is re-acquired when near expiry.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::Serialize;
use sha1::{Digest, Sha1};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::error::AuthError;
use super::{AccessTokenProvider, CredentialStrategy};
use crate::config::{AuthConfig, AuthMethod};
use crate::error::GraphError;
use crate::token::{BearerToken, TokenCache, TokenEndpoint, TokenRenewal};

pub const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// Lifetime of a client assertion.
const ASSERTION_LIFETIME_SECS: i64 = 600;

/// How the client authenticates to the token endpoint.
#[derive(Clone)]
pub enum ClientCredential {
    Secret(String),
    Certificate(Arc<CertificateCredential>),
}

impl ClientCredential {
    /// Secret first, then certificate. Neither is a configuration error.
    pub fn from_config(auth: &AuthConfig) -> Result<Self, GraphError> {
        if auth.has_client_secret() {
            return Ok(Self::Secret(auth.client_secret.clone()));
        }
        match &auth.certificate_path {
            Some(path) if auth.has_certificate() => Ok(Self::Certificate(Arc::new(
                CertificateCredential::from_file(path)?,
            ))),
            _ => Err(GraphError::Config(
                "choose either a client secret or a certificate for client credentials".into(),
            )),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Secret(_) => "secret",
            Self::Certificate(_) => "certificate",
        }
    }
}

impl fmt::Debug for ClientCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Secret(_) => f.write_str("Secret([REDACTED])"),
            Self::Certificate(cert) => f.debug_tuple("Certificate").field(cert).finish(),
        }
    }
}

// ---------------------------------------------------------------------------
// Certificate assertions
// ---------------------------------------------------------------------------

/// RSA private key plus the SHA-1 thumbprint of its certificate.
#[derive(Clone)]
pub struct CertificateCredential {
    thumbprint: String,
    key: EncodingKey,
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    aud: &'a str,
    iss: &'a str,
    sub: &'a str,
    jti: String,
    nbf: i64,
    iat: i64,
    exp: i64,
}

impl CertificateCredential {
    pub fn from_file(path: &Path) -> Result<Self, GraphError> {
        let pem = std::fs::read_to_string(path).map_err(|e| {
            AuthError::Certificate(format!("Failed to read '{}': {e}", path.display()))
        })?;
        Self::from_pem(&pem)
    }

    /// Parse a PEM bundle holding one `CERTIFICATE` and one unencrypted RSA
    /// private key (`RSA PRIVATE KEY` or PKCS#8 `PRIVATE KEY`).
    pub fn from_pem(bundle: &str) -> Result<Self, GraphError> {
        let entries = pem::parse_many(bundle)
            .map_err(|e| AuthError::Certificate(format!("invalid PEM bundle: {e}")))?;

        let cert = entries
            .iter()
            .find(|p| p.tag() == "CERTIFICATE")
            .ok_or_else(|| AuthError::Certificate("no CERTIFICATE block in bundle".into()))?;
        let thumbprint = URL_SAFE_NO_PAD.encode(Sha1::digest(cert.contents()));

        if entries.iter().any(|p| p.tag() == "ENCRYPTED PRIVATE KEY") {
            return Err(AuthError::Certificate(
                "encrypted private keys are not supported; export the key unencrypted".into(),
            )
            .into());
        }
        let key_entry = entries
            .iter()
            .find(|p| matches!(p.tag(), "RSA PRIVATE KEY" | "PRIVATE KEY"))
            .ok_or_else(|| AuthError::Certificate("no RSA private key in bundle".into()))?;

        let key = EncodingKey::from_rsa_pem(pem::encode(key_entry).as_bytes())
            .map_err(|e| AuthError::Certificate(format!("failed to load private key: {e}")))?;

        Ok(Self { thumbprint, key })
    }

    /// Base64url SHA-1 thumbprint, sent as the `x5t` header.
    pub fn thumbprint(&self) -> &str {
        &self.thumbprint
    }

    /// Signed client assertion for `audience` (the token endpoint).
    pub fn assertion(&self, client_id: &str, audience: &str) -> Result<String, GraphError> {
        let now = chrono::Utc::now().timestamp();
        let claims = AssertionClaims {
            aud: audience,
            iss: client_id,
            sub: client_id,
            jti: uuid::Uuid::new_v4().to_string(),
            nbf: now,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };

        let mut header = Header::new(Algorithm::RS256);
        header.x5t = Some(self.thumbprint.clone());

        encode(&header, &claims, &self.key)
            .map_err(|e| AuthError::Certificate(format!("failed to sign assertion: {e}")).into())
    }
}

impl fmt::Debug for CertificateCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateCredential")
            .field("thumbprint", &self.thumbprint)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Renewal and strategy
// ---------------------------------------------------------------------------

/// Acquires a fresh app-only token on every renewal.
#[derive(Debug, Clone)]
pub struct ClientCredentialsRenewal {
    endpoint: TokenEndpoint,
    client_id: String,
    credential: ClientCredential,
    scope: String,
}

impl ClientCredentialsRenewal {
    pub fn new(
        endpoint: TokenEndpoint,
        client_id: impl Into<String>,
        credential: ClientCredential,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            endpoint,
            client_id: client_id.into(),
            credential,
            scope: scope.into(),
        }
    }
}

#[async_trait]
impl TokenRenewal for ClientCredentialsRenewal {
    async fn renew(&self, _current: Option<&BearerToken>) -> Result<BearerToken, GraphError> {
        let mut form = vec![
            ("grant_type", "client_credentials".to_string()),
            ("client_id", self.client_id.clone()),
            ("scope", self.scope.clone()),
        ];
        match &self.credential {
            ClientCredential::Secret(secret) => form.push(("client_secret", secret.clone())),
            ClientCredential::Certificate(cert) => {
                let assertion = cert.assertion(&self.client_id, self.endpoint.url())?;
                form.push(("client_assertion_type", CLIENT_ASSERTION_TYPE.to_string()));
                form.push(("client_assertion", assertion));
            }
        }

        let form: Vec<(&str, &str)> = form.iter().map(|(k, v)| (*k, v.as_str())).collect();
        self.endpoint.request("client_credentials", &form).await
    }

    fn name(&self) -> &str {
        "client_credentials"
    }
}

/// Application-permission sign-in with a secret or certificate.
pub struct ClientCredentialsStrategy {
    renewal: Arc<ClientCredentialsRenewal>,
}

impl ClientCredentialsStrategy {
    /// Fails with a configuration error when neither a secret nor a
    /// certificate is configured, before any network activity.
    pub fn new(auth: &AuthConfig, http: reqwest::Client) -> Result<Self, GraphError> {
        let credential = ClientCredential::from_config(auth)?;
        let endpoint = TokenEndpoint::new(http, auth.token_endpoint());
        Ok(Self {
            renewal: Arc::new(ClientCredentialsRenewal::new(
                endpoint,
                auth.client_id.clone(),
                credential,
                auth.default_scope(),
            )),
        })
    }
}

#[async_trait]
impl CredentialStrategy for ClientCredentialsStrategy {
    fn method(&self) -> AuthMethod {
        AuthMethod::ClientCredentials
    }

    async fn authenticate(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn AccessTokenProvider>, GraphError> {
        let cache = TokenCache::new(self.renewal.clone());

        // Acquire once up front so bad credentials fail session establishment
        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(GraphError::Cancelled),
            result = cache.force_refresh() => result,
        };

        match result {
            Ok(_) => {
                info!(
                    credential = self.renewal.credential.kind(),
                    scope = %self.renewal.scope,
                    "Client credentials accepted"
                );
                Ok(Arc::new(cache))
            }
            Err(GraphError::Auth(AuthError::UnsupportedScope(detail))) => {
                error!(
                    scope = %self.renewal.scope,
                    "Scope not accepted; application permissions must be granted for the tenant"
                );
                Err(AuthError::UnsupportedScope(detail).into())
            }
            Err(e) => Err(e),
        }
    }
}
