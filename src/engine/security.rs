//! At-rest encryption for checkpoints, search history and stored credentials.
//!
//! Sealed values are `base64(nonce || ciphertext)` under AES-256-GCM, keyed
//! from a key file that is generated on first use.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use thiserror::Error;
use tracing::{debug, info};

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Error types for the cipher
#[derive(Error, Debug)]
pub enum SecurityError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid key file {0}")]
    InvalidKey(PathBuf),

    #[error("Malformed sealed value: {0}")]
    Malformed(String),

    #[error("Decryption failed")]
    Decrypt,

    #[error("Encryption failed")]
    Encrypt,
}

/// Result type for cipher operations
pub type SecurityResult<T> = Result<T, SecurityError>;

/// Symmetric cipher bound to one key file
#[derive(Clone)]
pub struct SecretBox {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for SecretBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretBox").finish_non_exhaustive()
    }
}

impl SecretBox {
    /// Load the key at `key_file`, generating and writing a new one if the file is missing.
    pub fn load_or_generate(key_file: &Path) -> SecurityResult<Self> {
        if key_file.exists() {
            let encoded = fs::read_to_string(key_file)?;
            let raw = BASE64
                .decode(encoded.trim())
                .map_err(|_| SecurityError::InvalidKey(key_file.to_path_buf()))?;
            if raw.len() != KEY_LEN {
                return Err(SecurityError::InvalidKey(key_file.to_path_buf()));
            }
            debug!("Loaded key from {}", key_file.display());
            return Ok(Self::from_key_bytes(&raw));
        }

        if let Some(parent) = key_file.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let key = Aes256Gcm::generate_key(OsRng);
        fs::write(key_file, BASE64.encode(key.as_slice()))?;
        info!("Generated new key file at {}", key_file.display());

        Ok(Self { cipher: Aes256Gcm::new(&key) })
    }

    fn from_key_bytes(raw: &[u8]) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(raw);
        Self { cipher: Aes256Gcm::new(key) }
    }

    /// Encrypt `plaintext`. Empty input seals to an empty string.
    pub fn seal(&self, plaintext: &str) -> SecurityResult<String> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| SecurityError::Encrypt)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(nonce.as_slice());
        blob.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(blob))
    }

    /// Decrypt a value produced by [`SecretBox::seal`].
    pub fn open(&self, sealed: &str) -> SecurityResult<String> {
        let sealed = sealed.trim();
        if sealed.is_empty() {
            return Ok(String::new());
        }

        let blob = BASE64
            .decode(sealed)
            .map_err(|e| SecurityError::Malformed(e.to_string()))?;
        if blob.len() <= NONCE_LEN {
            return Err(SecurityError::Malformed("value too short".to_string()));
        }

        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| SecurityError::Decrypt)?;

        String::from_utf8(plaintext).map_err(|e| SecurityError::Malformed(e.to_string()))
    }

    /// Decrypt, or hand back the input unchanged when it is not a sealed value.
    pub fn open_or_plain(&self, value: &str) -> String {
        self.open(value).unwrap_or_else(|_| value.to_string())
    }
}
