//! License payload sealing.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::{LicenseError, LicenseResult};
use crate::license::License;

const NONCE_LEN: usize = 12;

/// Pre-shared AES-256-GCM key.
#[derive(Clone)]
pub struct LicenseKey {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for LicenseKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LicenseKey(..)")
    }
}

impl LicenseKey {
    /// Parse a 64-character hex key.
    pub fn from_hex(hex_key: &str) -> LicenseResult<Self> {
        let bytes = hex::decode(hex_key.trim()).map_err(|e| LicenseError::InvalidKey(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> LicenseResult<Self> {
        let cipher = Aes256Gcm::new_from_slice(bytes)
            .map_err(|_| LicenseError::InvalidKey(format!("expected 32 bytes, got {}", bytes.len())))?;
        Ok(Self { cipher })
    }

    /// Decrypt and parse a `base64(nonce || ciphertext)` payload.
    pub fn open(&self, payload: &str) -> LicenseResult<License> {
        let raw = STANDARD.decode(payload.trim())?;
        if raw.len() <= NONCE_LEN {
            return Err(LicenseError::TooShort(raw.len()));
        }
        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| LicenseError::Decrypt)?;
        Ok(serde_json::from_slice(&plain)?)
    }

    /// Seal a license with a fresh random nonce.
    pub fn seal(&self, license: &License) -> LicenseResult<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        self.seal_with_nonce(license, nonce.as_slice())
    }

    fn seal_with_nonce(&self, license: &License, nonce: &[u8]) -> LicenseResult<String> {
        let body = serde_json::to_vec(license)?;
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(nonce), body.as_slice())
            .map_err(|_| LicenseError::Decrypt)?;
        let mut raw = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        raw.extend_from_slice(nonce);
        raw.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(raw))
    }
}
