//! Contact-field decryption.
//!
//! The platform encrypts buyer contact fields with AES-256-GCM keyed by the
//! application secret. Ciphertexts arrive as `base64(nonce ‖ ct ‖ tag)`.

use std::fmt;

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use thiserror::Error;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const PAD_CHAR: char = '#';

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecryptError {
    #[error("application secret does not normalize to a {KEY_LEN}-byte key")]
    InvalidKey,

    #[error("ciphertext is not valid base64: {0}")]
    Encoding(String),

    #[error("ciphertext too short: {0} bytes")]
    Truncated(usize),

    #[error("ciphertext failed authentication")]
    Authentication,

    #[error("plaintext is not valid UTF-8")]
    InvalidUtf8,
}

/// Normalize an application secret to exactly 32 characters.
///
/// Short secrets are padded with `#`, alternating left then right. Long
/// secrets lose one character at a time, alternating left then right.
pub fn normalize_secret(secret: &str) -> String {
    let mut chars: std::collections::VecDeque<char> = secret.trim().chars().collect();
    let mut left = true;
    while chars.len() < KEY_LEN {
        if left {
            chars.push_front(PAD_CHAR);
        } else {
            chars.push_back(PAD_CHAR);
        }
        left = !left;
    }
    while chars.len() > KEY_LEN {
        if left {
            chars.pop_front();
        } else {
            chars.pop_back();
        }
        left = !left;
    }
    chars.into_iter().collect()
}

/// Decrypts platform-encrypted fields with a key derived from the app secret.
#[derive(Clone)]
pub struct FieldDecryptor {
    cipher: Aes256Gcm,
}

impl fmt::Debug for FieldDecryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDecryptor").finish_non_exhaustive()
    }
}

impl FieldDecryptor {
    pub fn new(app_secret: &str) -> Result<Self, DecryptError> {
        let key = normalize_secret(app_secret);
        let cipher =
            Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| DecryptError::InvalidKey)?;
        Ok(Self { cipher })
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String, DecryptError> {
        let data = STANDARD
            .decode(encoded.trim())
            .map_err(|error| DecryptError::Encoding(error.to_string()))?;
        if data.len() < NONCE_LEN + TAG_LEN {
            return Err(DecryptError::Truncated(data.len()));
        }

        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| DecryptError::Authentication)?;
        String::from_utf8(plaintext).map_err(|_| DecryptError::InvalidUtf8)
    }

    /// Encrypt with a caller-chosen nonce. Used to build fixtures; never
    /// reuse a nonce for real data.
    pub fn encrypt_with_nonce(
        &self,
        plaintext: &str,
        nonce: &[u8; NONCE_LEN],
    ) -> Result<String, DecryptError> {
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(nonce), plaintext.as_bytes())
            .map_err(|_| DecryptError::Authentication)?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(nonce);
        out.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(out))
    }
}
