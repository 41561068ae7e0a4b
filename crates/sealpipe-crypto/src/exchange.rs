//! Asymmetric delivery of the session key (age X25519 recipients)
//!
//! The receiver owns a long-lived [`ReceiverKeyPair`] and announces its
//! public half as the bech32 recipient string (`age1...`). The sender parses
//! that into a [`PeerPublicKey`] and wraps a fresh [`SessionKey`] for it. The
//! age envelope authenticates its header and payload, so a wrapped key cannot
//! be altered without unwrapping failing.

use std::str::FromStr;

use age::x25519;

use crate::error::{CryptoError, CryptoResult};
use crate::keys::SessionKey;

/// The receiver's key pair. Created once, then shared read-only (e.g. behind
/// an `Arc`) by every incoming session for the life of the process.
pub struct ReceiverKeyPair {
    identity: x25519::Identity,
    public: x25519::Recipient,
}

impl ReceiverKeyPair {
    pub fn generate() -> Self {
        let identity = x25519::Identity::generate();
        let public = identity.to_public();
        tracing::debug!(public_key = %public, "generated receiver key pair");
        Self { identity, public }
    }

    /// Encoded public key as announced on the wire.
    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.public.to_string().into_bytes()
    }

    pub fn public_key(&self) -> PeerPublicKey {
        PeerPublicKey {
            recipient: self.public.clone(),
        }
    }

    /// Recover the session key from a wrapped-key blob produced by
    /// [`PeerPublicKey::wrap_session_key`].
    pub fn unwrap_session_key(&self, wrapped: &[u8]) -> CryptoResult<SessionKey> {
        let raw = age::decrypt(&self.identity, wrapped)
            .map_err(|e| CryptoError::KeyUnwrap(e.to_string()))?;
        SessionKey::from_vec(raw)
    }
}

impl std::fmt::Debug for ReceiverKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiverKeyPair")
            .field("public", &self.public.to_string())
            .field("identity", &"[REDACTED]")
            .finish()
    }
}

/// A peer's announced public key, parsed and ready to wrap a session key for.
#[derive(Clone)]
pub struct PeerPublicKey {
    recipient: x25519::Recipient,
}

impl PeerPublicKey {
    /// Parse an announced public key.
    pub fn from_bytes(encoded: &[u8]) -> CryptoResult<Self> {
        let text = std::str::from_utf8(encoded)
            .map_err(|_| CryptoError::InvalidPublicKey("not valid UTF-8".into()))?;
        let recipient = x25519::Recipient::from_str(text.trim())
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
        Ok(Self { recipient })
    }

    /// Encrypt `key` so only the holder of the matching key pair can recover it.
    pub fn wrap_session_key(&self, key: &SessionKey) -> CryptoResult<Vec<u8>> {
        age::encrypt(&self.recipient, key.as_bytes())
            .map_err(|e| CryptoError::KeyWrap(e.to_string()))
    }
}

impl std::fmt::Display for PeerPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.recipient)
    }
}

impl std::fmt::Debug for PeerPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PeerPublicKey")
            .field(&self.recipient.to_string())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generate_session_key;

    #[test]
    fn test_wrap_unwrap_roundtrip() {
        let pair = ReceiverKeyPair::generate();
        let peer = PeerPublicKey::from_bytes(&pair.public_key_bytes()).unwrap();
        let key = generate_session_key();

        let wrapped = peer.wrap_session_key(&key).unwrap();
        let unwrapped = pair.unwrap_session_key(&wrapped).unwrap();

        assert_eq!(key.as_bytes(), unwrapped.as_bytes());
    }

    #[test]
    fn test_wrapped_key_fits_wire_bound() {
        let pair = ReceiverKeyPair::generate();
        let wrapped = pair
            .public_key()
            .wrap_session_key(&generate_session_key())
            .unwrap();
        assert!(!wrapped.is_empty());
        // Receivers refuse wrapped keys above 10,000 bytes.
        assert!(wrapped.len() < 10_000);
    }

    #[test]
    fn test_unwrap_with_other_key_pair_fails() {
        let alice = ReceiverKeyPair::generate();
        let mallory = ReceiverKeyPair::generate();
        let wrapped = alice
            .public_key()
            .wrap_session_key(&generate_session_key())
            .unwrap();

        assert!(matches!(
            mallory.unwrap_session_key(&wrapped),
            Err(CryptoError::KeyUnwrap(_))
        ));
    }

    #[test]
    fn test_tampered_wrapped_key_fails() {
        let pair = ReceiverKeyPair::generate();
        let mut wrapped = pair
            .public_key()
            .wrap_session_key(&generate_session_key())
            .unwrap();
        let last = wrapped.len() - 1;
        wrapped[last] ^= 0x01;

        assert!(pair.unwrap_session_key(&wrapped).is_err());
    }

    #[test]
    fn test_parse_garbage_public_key() {
        assert!(matches!(
            PeerPublicKey::from_bytes(b"not-a-key"),
            Err(CryptoError::InvalidPublicKey(_))
        ));
        assert!(matches!(
            PeerPublicKey::from_bytes(&[0xFF, 0xFE, 0x00]),
            Err(CryptoError::InvalidPublicKey(_))
        ));
    }

    #[test]
    fn test_announced_key_is_stable() {
        let pair = ReceiverKeyPair::generate();
        assert_eq!(pair.public_key_bytes(), pair.public_key_bytes());
        assert!(pair.public_key_bytes().starts_with(b"age1"));
    }
}
