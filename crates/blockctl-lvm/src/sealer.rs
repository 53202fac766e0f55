//! iSCSI target password sealing
//!
//! The CHAP secret handed to `tgtadm` is plaintext; what gets persisted and
//! returned in connection strings is its sealed form.

use crate::error::{BlockError, BlockResult};
use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;
use std::io::Write;
use std::path::Path;

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// Seals target passwords before they leave the controller
pub trait PasswordSealer: Send + Sync {
    fn seal(&self, password: &str) -> BlockResult<String>;
}

/// AES-256-GCM sealing; output is base64(nonce || ciphertext)
pub struct AesGcmSealer {
    key: [u8; KEY_LEN],
}

impl AesGcmSealer {
    pub fn new(key: [u8; KEY_LEN]) -> Self {
        Self { key }
    }

    /// Read a base64-encoded 32-byte key from `path`
    pub fn from_key_file(path: &Path) -> BlockResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let raw = BASE64
            .decode(text.trim())
            .map_err(|e| BlockError::Seal(format!("invalid key file {}: {e}", path.display())))?;
        let key: [u8; KEY_LEN] = raw.try_into().map_err(|raw: Vec<u8>| {
            BlockError::Seal(format!(
                "key file {} holds {} bytes, expected {KEY_LEN}",
                path.display(),
                raw.len()
            ))
        })?;
        Ok(Self::new(key))
    }

    /// Write a fresh random key to `path`, refusing to overwrite one
    pub fn write_key_file(path: &Path) -> BlockResult<()> {
        let mut key = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut key);
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        writeln!(file, "{}", BASE64.encode(key))?;
        Ok(())
    }

    /// Reverse of [`PasswordSealer::seal`]
    pub fn unseal(&self, sealed: &str) -> BlockResult<String> {
        let raw = BASE64
            .decode(sealed)
            .map_err(|e| BlockError::Seal(e.to_string()))?;
        if raw.len() < NONCE_LEN {
            return Err(BlockError::Seal("sealed value too short".into()));
        }
        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        let cipher = self.cipher()?;
        let plain = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| BlockError::Seal(format!("decryption failed: {e}")))?;
        String::from_utf8(plain).map_err(|e| BlockError::Seal(e.to_string()))
    }

    fn cipher(&self) -> BlockResult<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| BlockError::Seal(format!("invalid key: {e}")))
    }
}

impl PasswordSealer for AesGcmSealer {
    fn seal(&self, password: &str) -> BlockResult<String> {
        let cipher = self.cipher()?;
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), password.as_bytes())
            .map_err(|e| BlockError::Seal(format!("encryption failed: {e}")))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(out))
    }
}

/// Returns the password unchanged. Offers no protection at all.
#[cfg(any(test, feature = "insecure-passthrough"))]
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughSealer;

#[cfg(any(test, feature = "insecure-passthrough"))]
impl PasswordSealer for PassthroughSealer {
    fn seal(&self, password: &str) -> BlockResult<String> {
        Ok(password.to_string())
    }
}

/// Random 16-byte secret, hex encoded
#[must_use]
pub fn generate_password() -> String {
    let mut raw = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut raw);
    hex::encode(raw)
}
