//! Per-transfer symmetric key material: session key and base nonce

use rand::RngCore;
use zeroize::Zeroize;

use crate::error::{CryptoError, CryptoResult};
use crate::{BASE_NONCE_SIZE, KEY_SIZE};

/// A one-time 256-bit AES-GCM key for a single file transfer. Zeroized on drop.
#[derive(Clone)]
pub struct SessionKey {
    bytes: [u8; KEY_SIZE],
}

impl SessionKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Build a key from an unwrapped buffer, rejecting anything that is not
    /// exactly `KEY_SIZE` bytes. The input is zeroized either way.
    pub fn from_vec(mut raw: Vec<u8>) -> CryptoResult<Self> {
        if raw.len() != KEY_SIZE {
            let actual = raw.len();
            raw.zeroize();
            return Err(CryptoError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual,
            });
        }
        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(&raw);
        raw.zeroize();
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for SessionKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Generate a random 256-bit session key.
pub fn generate_session_key() -> SessionKey {
    let mut bytes = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut bytes);
    SessionKey::from_bytes(bytes)
}

/// Generate a random 12-byte base nonce. Only the high 8 bytes survive into
/// derived nonces; the low 4 are overwritten by the message counter.
pub fn generate_base_nonce() -> [u8; BASE_NONCE_SIZE] {
    let mut nonce = [0u8; BASE_NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}
