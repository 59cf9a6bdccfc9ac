//! Bearer tokens, expiry inspection and the refresh-capable token cache.
//!
//! Expiry is read from the access token's own `exp` claim rather than from
//! the `expires_in` field, so a token loaded from disk hours after it was
//! issued is still judged correctly.

pub mod cache;
pub mod endpoint;
pub mod storage;

use std::fmt;
use std::time::Duration;

use jsonwebtoken::{DecodingKey, Validation, decode, decode_header};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use cache::{RefreshTokenRenewal, TokenCache, TokenRenewal};
pub use endpoint::TokenEndpoint;
pub use storage::{EncryptedFileStorage, MemoryTokenStorage, TokenStorage};

/// Renew a cached token when less than this much lifetime remains.
pub const REFRESH_THRESHOLD: Duration = Duration::from_secs(30 * 60);

/// Default threshold for [`is_near_expiry`].
pub const NEAR_EXPIRY_THRESHOLD: Duration = Duration::from_secs(10 * 60);

/// Token endpoint response, also the on-disk token format.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct BearerToken {
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub expires_in: i64,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerToken")
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("expires_in", &self.expires_in)
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Freshness of the current token relative to the refresh threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    Valid,
    NearExpiry,
}

impl BearerToken {
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Self {
            token_type: default_token_type(),
            scope: String::new(),
            expires_in: 0,
            access_token: access_token.into(),
            refresh_token,
        }
    }

    /// Unix timestamp from the access token's `exp` claim.
    pub fn expires_at(&self) -> Option<i64> {
        jwt_expiry(&self.access_token)
    }

    pub fn state(&self, threshold: Duration) -> TokenState {
        if is_near_expiry(&self.access_token, threshold) {
            TokenState::NearExpiry
        } else {
            TokenState::Valid
        }
    }

    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty())
    }

    /// `Authorization` header value.
    pub fn authorization(&self) -> String {
        let kind = if self.token_type.is_empty() {
            "Bearer"
        } else {
            &self.token_type
        };
        format!("{kind} {}", self.access_token)
    }
}

#[derive(Debug, Deserialize)]
struct ExpiryClaims {
    exp: i64,
}

/// Read the `exp` claim without verifying the signature.
///
/// The token is only inspected, never trusted: Graph validates it on every
/// call. Returns `None` for anything that is not a decodable JWT.
pub fn jwt_expiry(token: &str) -> Option<i64> {
    let header = decode_header(token).ok()?;

    let mut validation = Validation::new(header.alg);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    decode::<ExpiryClaims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims.exp)
        .ok()
}

/// `true` when `exp - now < threshold`. Undecodable tokens count as near expiry.
pub fn is_near_expiry(token: &str, threshold: Duration) -> bool {
    is_near_expiry_at(token, threshold, chrono::Utc::now().timestamp())
}

pub fn is_near_expiry_at(token: &str, threshold: Duration, now: i64) -> bool {
    match jwt_expiry(token) {
        Some(exp) => exp - now < threshold.as_secs() as i64,
        None => {
            debug!("Access token is not a decodable JWT; treating as near expiry");
            true
        }
    }
}
