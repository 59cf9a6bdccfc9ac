//! Form-encoded requests against the identity platform token endpoint.

use serde::Deserialize;
use tracing::{debug, warn};

use super::BearerToken;
use crate::auth::error::AuthError;
use crate::error::{GraphError, parse_retry_after};
use crate::retry::THROTTLE_STATUSES;

/// Error code the tenant returns when the requested scope is not valid for the app.
pub const UNSUPPORTED_SCOPE_CODE: &str = "AADSTS70011";

/// Error response from the token endpoint.
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// `{authority}/oauth2/v2.0/token` plus the HTTP client used to reach it.
#[derive(Debug, Clone)]
pub struct TokenEndpoint {
    http: reqwest::Client,
    url: String,
}

impl TokenEndpoint {
    pub fn new(http: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// POST `form` and parse the response as a [`BearerToken`].
    ///
    /// `grant` only labels log lines.
    pub async fn request(
        &self,
        grant: &str,
        form: &[(&str, &str)],
    ) -> Result<BearerToken, GraphError> {
        debug!(grant, url = %self.url, "Requesting token");

        let response = self.http.post(&self.url).form(form).send().await?;

        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await?;

        if !status.is_success() {
            return Err(token_error(grant, status.as_u16(), retry_after, &body));
        }

        let token: BearerToken = serde_json::from_str(&body).map_err(|e| {
            AuthError::ExchangeFailed(format!("Failed to parse token response: {e}"))
        })?;

        debug!(grant, expires_in = token.expires_in, "Token request successful");
        Ok(token)
    }

    /// Redeem a refresh token.
    pub async fn refresh(
        &self,
        client_id: &str,
        refresh_token: &str,
    ) -> Result<BearerToken, GraphError> {
        self.request(
            "refresh_token",
            &[
                ("grant_type", "refresh_token"),
                ("client_id", client_id),
                ("refresh_token", refresh_token),
            ],
        )
        .await
    }
}

fn token_error(
    grant: &str,
    status: u16,
    retry_after: Option<std::time::Duration>,
    body: &str,
) -> GraphError {
    if THROTTLE_STATUSES.contains(&status) {
        return GraphError::Throttled {
            status,
            retry_after,
        };
    }

    let Ok(error) = serde_json::from_str::<TokenErrorResponse>(body) else {
        warn!(grant, status, "Token endpoint returned an unparseable error");
        return GraphError::Api {
            status,
            message: body.to_string(),
        };
    };

    warn!(
        grant,
        status,
        error = %error.error,
        description = ?error.error_description,
        "Token request failed"
    );

    let description = error
        .error_description
        .unwrap_or_else(|| error.error.clone());

    if description.contains(UNSUPPORTED_SCOPE_CODE) {
        return AuthError::UnsupportedScope(description).into();
    }

    match error.error.as_str() {
        "invalid_grant" => AuthError::InvalidGrant(description).into(),
        "invalid_client" | "unauthorized_client" | "invalid_request" | "invalid_scope" => {
            AuthError::Rejected {
                status,
                message: description,
            }
            .into()
        }
        _ if status == 400 || status == 401 || status == 403 => AuthError::Rejected {
            status,
            message: description,
        }
        .into(),
        _ => GraphError::Api {
            status,
            message: description,
        },
    }
}
