//! sealpipe-crypto: per-transfer session crypto
//!
//! ```text
//! Receiver key pair (age X25519, process lifetime)
//!   └── Session key (256-bit random, one per file, wrapped to the receiver)
//!       └── AES-256-GCM, nonce = base_nonce[0..8] || counter (u32 BE)
//!           ├── message 0: manifest     (AAD = "manifest")
//!           └── message 1..: file chunks (AAD = SHA-256 of the file)
//! ```

pub mod error;
pub mod exchange;
pub mod keys;
pub mod session;

pub use error::{CryptoError, CryptoResult};
pub use exchange::{PeerPublicKey, ReceiverKeyPair};
pub use keys::{generate_base_nonce, generate_session_key, SessionKey};
pub use session::{nonce_for, AeadSession};

/// Size of a session key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an AES-GCM nonce, and of the base nonce sent on the wire
pub const BASE_NONCE_SIZE: usize = 12;

/// Trailing nonce bytes overwritten by the message counter
pub const COUNTER_SIZE: usize = 4;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;
