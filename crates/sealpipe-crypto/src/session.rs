//! AES-256-GCM session with counter-derived nonces
//!
//! Nonce layout (12 bytes):
//! ```text
//! [8 bytes: base nonce prefix][4 bytes: message counter, big-endian]
//! ```
//!
//! Every `seal` and every `open` consumes exactly one counter value, starting
//! at 0. Sender and receiver advance in lock-step: the n-th sealed message is
//! only ever opened as the n-th opened message. A dropped or duplicated frame
//! therefore makes every later `open` fail; there is no resynchronisation.

use std::sync::atomic::{AtomicU32, Ordering};

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};

use crate::error::{CryptoError, CryptoResult};
use crate::keys::SessionKey;
use crate::{BASE_NONCE_SIZE, COUNTER_SIZE};

/// One file transfer's authenticated-encryption state.
///
/// Never reuse a session across files: build a new one from a fresh key and
/// base nonce for every transfer.
pub struct AeadSession {
    cipher: Aes256Gcm,
    base_nonce: [u8; BASE_NONCE_SIZE],
    counter: AtomicU32,
}

impl AeadSession {
    pub fn new(key: &SessionKey, base_nonce: [u8; BASE_NONCE_SIZE]) -> Self {
        Self {
            cipher: Aes256Gcm::new(key.as_bytes().into()),
            base_nonce,
            counter: AtomicU32::new(0),
        }
    }

    /// Encrypt `plaintext`, binding `aad` into the tag.
    ///
    /// Returns `[ciphertext][16-byte tag]`.
    pub fn seal(&self, plaintext: &[u8], aad: &[u8]) -> CryptoResult<Vec<u8>> {
        let (_, nonce) = self.next_nonce()?;
        self.cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| CryptoError::Encryption)
    }

    /// Decrypt and authenticate `ciphertext` against `aad`.
    ///
    /// The counter advances even when authentication fails; a session that
    /// has failed once cannot be used again.
    pub fn open(&self, ciphertext: &[u8], aad: &[u8]) -> CryptoResult<Vec<u8>> {
        let (counter, nonce) = self.next_nonce()?;
        self.cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| {
                tracing::debug!(counter, "AEAD open failed");
                CryptoError::Authentication
            })
    }

    /// Number of counter values consumed so far.
    pub fn counter(&self) -> u32 {
        self.counter.load(Ordering::Acquire)
    }

    pub fn base_nonce(&self) -> &[u8; BASE_NONCE_SIZE] {
        &self.base_nonce
    }

    /// Reserve the next counter value and derive its nonce in one step.
    ///
    /// The reservation is a single atomic read-modify-write, so two callers
    /// can never observe the same counter value. The counter never wraps.
    fn next_nonce(&self) -> CryptoResult<(u32, [u8; BASE_NONCE_SIZE])> {
        let counter = self
            .counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_add(1))
            .map_err(|c| CryptoError::NonceExhausted(u64::from(c)))?;
        Ok((counter, nonce_for(&self.base_nonce, counter)))
    }

    #[cfg(test)]
    fn with_counter(key: &SessionKey, base_nonce: [u8; BASE_NONCE_SIZE], counter: u32) -> Self {
        let session = Self::new(key, base_nonce);
        session.counter.store(counter, Ordering::Release);
        session
    }
}

impl std::fmt::Debug for AeadSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AeadSession")
            .field("base_nonce", &self.base_nonce)
            .field("counter", &self.counter())
            .finish_non_exhaustive()
    }
}

/// Derive the nonce for `counter`: the base nonce with its low 4 bytes
/// replaced by the big-endian counter.
pub fn nonce_for(base_nonce: &[u8; BASE_NONCE_SIZE], counter: u32) -> [u8; BASE_NONCE_SIZE] {
    let mut nonce = *base_nonce;
    nonce[BASE_NONCE_SIZE - COUNTER_SIZE..].copy_from_slice(&counter.to_be_bytes());
    nonce
}
