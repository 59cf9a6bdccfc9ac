//! Token persistence backends.
//!
//! - [`EncryptedFileStorage`] - AES-encrypted token file, migrating legacy plaintext
//! - [`MemoryTokenStorage`] - In-memory storage for testing
//!
//! Storage operations are synchronous and the file backend fsyncs on save.
//! [`TokenCache`](super::TokenCache) runs them on the blocking pool.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{info, instrument, warn};

use super::BearerToken;
use crate::config::AuthConfig;
use crate::crypto::{self, TokenKey};
use crate::error::GraphError;

// =============================================================================
// TokenStorage trait
// =============================================================================

/// Trait for token storage backends. Holds at most one token.
pub trait TokenStorage: Send + Sync {
    /// Load the stored token, if any.
    fn load(&self) -> Result<Option<BearerToken>, GraphError>;

    /// Replace the stored token.
    fn save(&self, token: &BearerToken) -> Result<(), GraphError>;

    fn remove(&self) -> Result<(), GraphError>;

    /// Get the name of this storage backend.
    fn name(&self) -> &str;
}

impl<T: TokenStorage + ?Sized> TokenStorage for Arc<T> {
    fn load(&self) -> Result<Option<BearerToken>, GraphError> {
        (**self).load()
    }
    fn save(&self, token: &BearerToken) -> Result<(), GraphError> {
        (**self).save(token)
    }
    fn remove(&self) -> Result<(), GraphError> {
        (**self).remove()
    }
    fn name(&self) -> &str {
        (**self).name()
    }
}

// =============================================================================
// EncryptedFileStorage
// =============================================================================

/// Token file holding `base64(IV || AES-256-CBC(JSON))`.
///
/// A file that does not decrypt is tried as legacy plaintext JSON; if that
/// parses, it is rewritten encrypted in place.
#[derive(Debug, Clone)]
pub struct EncryptedFileStorage {
    path: PathBuf,
    key: TokenKey,
}

impl EncryptedFileStorage {
    pub fn new(path: impl Into<PathBuf>, key: TokenKey) -> Self {
        Self {
            path: path.into(),
            key,
        }
    }

    /// Resolve the key from `auth.token_key`, else from the sibling key file.
    pub fn from_config(auth: &AuthConfig) -> Result<Self, GraphError> {
        let key = match auth.token_key.as_deref() {
            Some(encoded) if !encoded.trim().is_empty() => TokenKey::from_base64(encoded)?,
            _ => TokenKey::load_or_create(&auth.token_key_path())?,
        };
        Ok(Self::new(auth.token_path.clone(), key))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parse(&self, content: &str) -> Option<BearerToken> {
        match crypto::decrypt_from_string(content, &self.key) {
            Ok(plaintext) => match serde_json::from_str(&plaintext) {
                Ok(token) => return Some(token),
                Err(e) => warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Decrypted token file is not a valid token"
                ),
            },
            Err(e) => warn!(
                path = %self.path.display(),
                error = %e,
                "Token file did not decrypt, trying legacy plaintext"
            ),
        }

        let token: BearerToken = match serde_json::from_str(content) {
            Ok(token) => token,
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Token file is neither encrypted nor legacy JSON"
                );
                return None;
            }
        };

        match self.save(&token) {
            Ok(()) => info!(path = %self.path.display(), "Migrated legacy token file to encrypted format"),
            Err(e) => warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to re-persist legacy token file encrypted"
            ),
        }
        Some(token)
    }
}

impl TokenStorage for EncryptedFileStorage {
    #[instrument(skip(self), fields(path = %self.path.display()))]
    fn load(&self) -> Result<Option<BearerToken>, GraphError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(GraphError::Storage(format!(
                    "Failed to read token file '{}': {}",
                    self.path.display(),
                    e
                )));
            }
        };

        if content.trim().is_empty() {
            return Ok(None);
        }

        Ok(self.parse(content.trim()))
    }

    #[instrument(skip(self, token), fields(path = %self.path.display()))]
    fn save(&self, token: &BearerToken) -> Result<(), GraphError> {
        let json = serde_json::to_string(token)?;
        let payload = crypto::encrypt_to_string(&json, &self.key);

        crypto::write_private_file(&self.path, payload.as_bytes()).map_err(|e| {
            GraphError::Storage(format!(
                "Failed to write token file '{}': {}",
                self.path.display(),
                e
            ))
        })
    }

    #[instrument(skip(self), fields(path = %self.path.display()))]
    fn remove(&self) -> Result<(), GraphError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(GraphError::Storage(format!(
                "Failed to remove token file '{}': {}",
                self.path.display(),
                e
            ))),
        }
    }

    fn name(&self) -> &str {
        "encrypted-file"
    }
}

// =============================================================================
// MemoryTokenStorage
// =============================================================================

/// In-memory token storage. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryTokenStorage {
    inner: Arc<RwLock<Option<BearerToken>>>,
}

impl MemoryTokenStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: BearerToken) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Some(token))),
        }
    }
}

impl TokenStorage for MemoryTokenStorage {
    fn load(&self) -> Result<Option<BearerToken>, GraphError> {
        let guard = self
            .inner
            .read()
            .map_err(|_| GraphError::Storage("lock poisoned".into()))?;
        Ok(guard.clone())
    }

    fn save(&self, token: &BearerToken) -> Result<(), GraphError> {
        let mut guard = self
            .inner
            .write()
            .map_err(|_| GraphError::Storage("lock poisoned".into()))?;
        *guard = Some(token.clone());
        Ok(())
    }

    fn remove(&self) -> Result<(), GraphError> {
        let mut guard = self
            .inner
            .write()
            .map_err(|_| GraphError::Storage("lock poisoned".into()))?;
        *guard = None;
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

// =============================================================================
// Tests
// =============================================================================
