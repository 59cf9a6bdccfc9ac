//! Error types for credential strategies and token renewal.

/// Errors that can occur while authenticating or renewing a token.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The selected auth method cannot be used against Graph.
    #[error("Unsupported authentication method: {0}")]
    Unsupported(String),

    /// The tenant rejected the requested scope (AADSTS70011).
    #[error("Scope not accepted by the tenant: {0}")]
    UnsupportedScope(String),

    /// The token endpoint rejected the client credentials.
    #[error("Credentials rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The refresh token or authorization code is expired or revoked.
    #[error("Grant expired or revoked: {0}")]
    InvalidGrant(String),

    /// Token refresh failed for a reason other than a revoked grant.
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    /// No token is available and none can be obtained without user action.
    #[error("No token available")]
    NoToken,

    /// The stored token has no refresh token to renew with.
    #[error("Token cannot be renewed: no refresh token")]
    NoRefreshToken,

    /// The certificate bundle could not be read or used.
    #[error("Certificate error: {0}")]
    Certificate(String),

    /// Authorization code exchange failed.
    #[error("Exchange failed: {0}")]
    ExchangeFailed(String),

    /// Invalid or unknown state token (possible CSRF).
    #[error("Invalid state token")]
    InvalidState,

    /// The authorization server redirected back with an error.
    #[error("Authorization denied: {0}")]
    Callback(String),

    /// The user did not complete sign-in in time.
    #[error("Flow expired")]
    FlowExpired,
}
