//! Wire-level constants and tags shared by every sealpipe crate

/// Plaintext bytes per chunk frame (1 MiB). Fixed by the protocol.
pub const CHUNK_SIZE: usize = 1 << 20;

/// Upper bound on the announced public key length.
pub const MAX_PUBLIC_KEY_LEN: u32 = 64 * 1024;

/// Upper bound on the wrapped session key length.
///
/// An age X25519 envelope around a 32-byte key is a few hundred bytes.
pub const MAX_WRAPPED_KEY_LEN: u32 = 10_000;

/// Upper bound on the sealed manifest frame.
pub const MAX_MANIFEST_FRAME_LEN: u32 = 64 * 1024;

/// Associated data bound into the sealed manifest.
pub const MANIFEST_AAD: &[u8] = b"manifest";

/// Leading tag byte of the two key-exchange messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageTag {
    /// Receiver -> sender: public key announcement
    PublicKey = 0x01,
    /// Sender -> receiver: wrapped session key + base nonce
    KeyDelivery = 0x02,
}

impl MessageTag {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::PublicKey),
            0x02 => Some(Self::KeyDelivery),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}
