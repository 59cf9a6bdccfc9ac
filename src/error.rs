//! Crate-wide error type and Graph error-response mapping.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::Deserialize;

use crate::auth::error::AuthError;
use crate::crypto::CryptoError;
use crate::retry::{Retryable, THROTTLE_STATUSES, ThrottleHint};

/// Coarse failure class callers can branch on instead of parsing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or contradictory configuration. Never retried.
    Config,
    /// Credentials were rejected, a grant expired, or the flow failed.
    Auth,
    /// Throttling-class response (429/503/504). Retried by the orchestrator.
    Transient,
    /// Transport, storage, crypto and unexpected API failures.
    Io,
    /// The caller cancelled the operation.
    Cancelled,
}

/// Unified error type for sessions, credential strategies and Graph calls.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Throttled ({status}): retry after {retry_after:?}")]
    Throttled {
        status: u16,
        retry_after: Option<Duration>,
    },

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("No session established")]
    NotConnected,

    #[error("Operation cancelled")]
    Cancelled,
}

impl GraphError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Config,
            Self::Auth(_) | Self::NotConnected => ErrorKind::Auth,
            Self::Throttled { .. } => ErrorKind::Transient,
            Self::Api { status, .. } if *status == 401 || *status == 403 => ErrorKind::Auth,
            Self::Api { .. } | Self::Storage(_) | Self::Crypto(_) | Self::Http(_) => ErrorKind::Io,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Server-suggested delay carried by a throttling response, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Throttled { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Build the error for a non-success Graph API response.
    ///
    /// Throttling statuses keep their `Retry-After` hint; everything else
    /// carries the best message extracted from the OData error body.
    pub fn from_response(status: StatusCode, headers: &HeaderMap, body: &str) -> Self {
        let code = status.as_u16();
        if THROTTLE_STATUSES.contains(&code) {
            return Self::Throttled {
                status: code,
                retry_after: parse_retry_after(headers),
            };
        }

        let message = serde_json::from_str::<ODataErrorBody>(body)
            .map(|b| format!("{}: {}", b.error.code, b.error.message))
            .unwrap_or_else(|_| {
                if body.is_empty() {
                    status.canonical_reason().unwrap_or("unknown").to_string()
                } else {
                    body.to_string()
                }
            });

        Self::Api {
            status: code,
            message,
        }
    }
}

impl Retryable for GraphError {
    fn throttle_hint(&self) -> Option<ThrottleHint> {
        match self {
            Self::Throttled {
                status,
                retry_after,
            } => Some(ThrottleHint {
                status: *status,
                retry_after: *retry_after,
            }),
            _ => None,
        }
    }
}

/// Parse a `Retry-After` header given either as delta-seconds or an HTTP date.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();

    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let date = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let delta = date.timestamp() - chrono::Utc::now().timestamp();
    Some(Duration::from_secs(delta.max(0) as u64))
}

/// Graph's OData error envelope: `{"error": {"code": "...", "message": "..."}}`.
#[derive(Debug, Deserialize)]
struct ODataErrorBody {
    error: ODataErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ODataErrorDetail {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

impl From<std::io::Error> for GraphError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for GraphError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(format!("JSON error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_error_kinds() {
        assert_eq!(GraphError::Config("x".into()).kind(), ErrorKind::Config);
        assert_eq!(
            GraphError::Auth(AuthError::NoToken).kind(),
            ErrorKind::Auth
        );
        assert_eq!(
            GraphError::Throttled {
                status: 429,
                retry_after: None
            }
            .kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            GraphError::Api {
                status: 401,
                message: "nope".into()
            }
            .kind(),
            ErrorKind::Auth
        );
        assert_eq!(
            GraphError::Api {
                status: 404,
                message: "missing".into()
            }
            .kind(),
            ErrorKind::Io
        );
        assert_eq!(GraphError::Cancelled.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_parse_retry_after_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("3"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_parse_retry_after_missing_or_garbage() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("soon"));
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn test_parse_retry_after_past_date_is_zero() {
        let mut headers = HeaderMap::new();
        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(parse_retry_after(&headers), Some(Duration::ZERO));
    }

    #[test]
    fn test_from_response_throttled_keeps_hint() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        let err = GraphError::from_response(StatusCode::TOO_MANY_REQUESTS, &headers, "");
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
        assert!(err.throttle_hint().is_some());
    }

    #[test]
    fn test_from_response_odata_body() {
        let body = r#"{"error":{"code":"itemNotFound","message":"The resource could not be found."}}"#;
        let err = GraphError::from_response(StatusCode::NOT_FOUND, &HeaderMap::new(), body);
        assert_eq!(
            err.to_string(),
            "API error (404): itemNotFound: The resource could not be found."
        );
        assert!(err.throttle_hint().is_none());
    }

    #[test]
    fn test_gateway_timeout_is_throttled() {
        let err = GraphError::from_response(StatusCode::GATEWAY_TIMEOUT, &HeaderMap::new(), "");
        assert_eq!(
            err.throttle_hint(),
            Some(ThrottleHint {
                status: 504,
                retry_after: None
            })
        );
    }
}
