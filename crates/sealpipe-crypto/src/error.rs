use thiserror::Error;

pub type CryptoResult<T> = Result<T, CryptoError>;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// AEAD tag check failed: wrong key, wrong nonce, tampered ciphertext or
    /// associated data.
    #[error("authentication failed")]
    Authentication,

    /// Sealing failed inside the cipher (plaintext too large for GCM).
    #[error("encryption failed")]
    Encryption,

    /// Every counter value of this session has been used.
    #[error("nonce counter exhausted after {0} messages")]
    NonceExhausted(u64),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("session key wrapping failed: {0}")]
    KeyWrap(String),

    #[error("session key unwrapping failed: {0}")]
    KeyUnwrap(String),

    #[error("invalid key length: {actual} bytes (expected {expected})")]
    InvalidKeyLength { expected: usize, actual: usize },
}
