use std::fmt;

use sealpipe_crypto::CryptoError;
use thiserror::Error;

pub type TransferResult<T> = Result<T, TransferError>;

/// The protocol step an error occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Receiver's public key announcement (message tag 0x01)
    PublicKey,
    /// Sender's wrapped session key and base nonce (message tag 0x02)
    KeyDelivery,
    /// Sealed manifest frame
    Manifest,
    /// Sealed chunk frame, zero-based
    Chunk(u64),
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::PublicKey => f.write_str("public key announcement"),
            Step::KeyDelivery => f.write_str("session key delivery"),
            Step::Manifest => f.write_str("manifest"),
            Step::Chunk(index) => write!(f, "chunk {index}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum TransferError {
    /// The underlying stream failed (reset, timeout, closed while writing).
    #[error("transport error during {step}: {source}")]
    Transport {
        step: Step,
        #[source]
        source: std::io::Error,
    },

    /// Unexpected tag, out-of-bounds length, short stream or overrun.
    #[error("framing error during {step}: {reason}")]
    Framing { step: Step, reason: String },

    /// AEAD open failed: tampering, corruption or frame desynchronisation.
    #[error("authentication failed for {step}")]
    Authentication { step: Step },

    /// Received content does not hash to the manifest's digest.
    #[error("hash mismatch: expected {expected}, computed {computed}")]
    HashMismatch { expected: String, computed: String },

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("crypto error during {step}: {source}")]
    Crypto {
        step: Step,
        #[source]
        source: CryptoError,
    },

    /// Local filesystem failure, reported verbatim with what was attempted.
    #[error("{context}: {source}")]
    LocalIo {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl TransferError {
    pub(crate) fn framing(step: Step, reason: impl Into<String>) -> Self {
        TransferError::Framing {
            step,
            reason: reason.into(),
        }
    }

    pub(crate) fn local_io(context: impl Into<String>, source: std::io::Error) -> Self {
        TransferError::LocalIo {
            context: context.into(),
            source,
        }
    }

    /// Classify a stream read/write failure: running out of bytes mid-message
    /// is a framing error, anything else is the transport's fault.
    pub(crate) fn from_stream(step: Step, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::UnexpectedEof {
            TransferError::framing(step, "stream ended before the message was complete")
        } else {
            TransferError::Transport { step, source }
        }
    }

    /// Map a crypto failure, keeping AEAD tag failures distinct.
    pub(crate) fn from_crypto(step: Step, source: CryptoError) -> Self {
        match source {
            CryptoError::Authentication => TransferError::Authentication { step },
            source => TransferError::Crypto { step, source },
        }
    }
}
