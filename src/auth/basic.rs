use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::error;

use super::error::AuthError;
use super::{AccessTokenProvider, CredentialStrategy};
use crate::config::AuthMethod;
use crate::error::GraphError;

/// Username/password sign-in. Graph does not accept it, so this always fails.
#[derive(Debug, Default)]
pub struct BasicStrategy;

#[async_trait]
impl CredentialStrategy for BasicStrategy {
    fn method(&self) -> AuthMethod {
        AuthMethod::Basic
    }

    async fn authenticate(
        &self,
        _cancel: &CancellationToken,
    ) -> Result<Arc<dyn AccessTokenProvider>, GraphError> {
        error!("Basic authentication is not supported for Microsoft Graph");
        Err(AuthError::Unsupported("basic".into()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_basic_always_fails() {
        let err = BasicStrategy
            .authenticate(&CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, GraphError::Auth(AuthError::Unsupported(_))));
    }
}
