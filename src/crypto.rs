//! AES-256-CBC protection for the persisted token file.
//!
//! Payload layout: `base64(IV || ciphertext)` where the IV is 16 random bytes
//! drawn fresh for every encryption and the plaintext is PKCS7 padded.

use std::fmt;
use std::path::{Path, PathBuf};

use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use tracing::{debug, info};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

pub const KEY_LEN: usize = 32;
pub const IV_LEN: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("payload is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("payload too short ({0} bytes)")]
    Truncated(usize),

    #[error("decryption failed (wrong key or corrupted payload)")]
    Decrypt,

    #[error("decrypted payload is not UTF-8")]
    Utf8,

    #[error("key file error: {0}")]
    KeyFile(String),
}

/// 256-bit symmetric key used for the token file.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenKey([u8; KEY_LEN]);

impl TokenKey {
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn generate() -> Self {
        Self(rand::random())
    }

    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = BASE64.decode(encoded.trim())?;
        let arr: [u8; KEY_LEN] = bytes.as_slice().try_into().map_err(|_| {
            CryptoError::InvalidKey(format!("expected {KEY_LEN} bytes, got {}", bytes.len()))
        })?;
        Ok(Self(arr))
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Read the key stored at `path`, or generate one and store it there.
    ///
    /// The key file holds the base64 key on one line and is created 0600.
    /// Creation is exclusive: when another caller wins the race, its key is
    /// read back and returned instead of the one generated here.
    pub fn load_or_create(path: &Path) -> Result<Self, CryptoError> {
        if let Some(key) = Self::read_key_file(path)? {
            debug!(path = %path.display(), "Loaded token key file");
            return Ok(key);
        }

        let key = Self::generate();
        match create_private_file(path, key.to_base64().as_bytes()) {
            Ok(()) => {
                info!(path = %path.display(), "Generated new token key file");
                Ok(key)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                debug!(path = %path.display(), "Token key file created concurrently");
                Self::read_key_file(path)?.ok_or_else(|| {
                    CryptoError::KeyFile(format!("{}: vanished after creation", path.display()))
                })
            }
            Err(e) => Err(CryptoError::KeyFile(format!("{}: {e}", path.display()))),
        }
    }

    fn read_key_file(path: &Path) -> Result<Option<Self>, CryptoError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_base64(&contents).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CryptoError::KeyFile(format!("{}: {e}", path.display()))),
        }
    }
}

impl fmt::Debug for TokenKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TokenKey([REDACTED])")
    }
}

/// Encrypt `plaintext`, returning `IV || ciphertext`.
pub fn encrypt(plaintext: &[u8], key: &TokenKey) -> Vec<u8> {
    let iv: [u8; IV_LEN] = rand::random();
    let ciphertext =
        Aes256CbcEnc::new(key.as_bytes().into(), &iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut out = Vec::with_capacity(IV_LEN + ciphertext.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    out
}

/// Decrypt an `IV || ciphertext` buffer produced by [`encrypt`].
pub fn decrypt(data: &[u8], key: &TokenKey) -> Result<Vec<u8>, CryptoError> {
    if data.len() < IV_LEN * 2 {
        return Err(CryptoError::Truncated(data.len()));
    }
    let (iv, ciphertext) = data.split_at(IV_LEN);
    let iv: [u8; IV_LEN] = iv
        .try_into()
        .map_err(|_| CryptoError::Truncated(data.len()))?;

    Aes256CbcDec::new(key.as_bytes().into(), &iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CryptoError::Decrypt)
}

pub fn encrypt_to_string(plaintext: &str, key: &TokenKey) -> String {
    BASE64.encode(encrypt(plaintext.as_bytes(), key))
}

pub fn decrypt_from_string(payload: &str, key: &TokenKey) -> Result<String, CryptoError> {
    let data = BASE64.decode(payload.trim())?;
    let plaintext = decrypt(&data, key)?;
    String::from_utf8(plaintext).map_err(|_| CryptoError::Utf8)
}

/// Write `contents` to `path` atomically with owner-only permissions.
///
/// The data goes to a uniquely named sibling first and is renamed over the
/// target, so readers see either the old file or the new one.
pub(crate) fn write_private_file(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let tmp_path = write_private_temp(path, contents)?;
    if let Err(e) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(e);
    }
    Ok(())
}

/// Like [`write_private_file`] but never replaces an existing file.
///
/// Fails with `AlreadyExists` when `path` is present. The target only ever
/// appears fully written.
pub(crate) fn create_private_file(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let tmp_path = write_private_temp(path, contents)?;
    let linked = std::fs::hard_link(&tmp_path, path);
    let _ = std::fs::remove_file(&tmp_path);
    linked
}

/// Synced 0600 sibling of `path` holding `contents`.
fn write_private_temp(path: &Path, contents: &[u8]) -> std::io::Result<PathBuf> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700))?;
            }
        }
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "graph-gate".to_string());
    let tmp_path = path.with_file_name(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));

    // 0600 at creation so the secret is never readable by others, even briefly.
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(&tmp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }

    #[cfg(not(unix))]
    std::fs::write(&tmp_path, contents)?;

    Ok(tmp_path)
}
