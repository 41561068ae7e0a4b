//! Manifest: the authenticated description of the file being transferred.
//!
//! Wire form (sealed with AAD = "manifest"):
//! ```json
//! { "name": "report.pdf", "size": 3145728, "hash": "<64 lowercase hex chars>" }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::error::{TransferError, TransferResult};

/// Size of the SHA-256 digest carried in the manifest.
pub const HASH_SIZE: usize = 32;

const READ_BUF_SIZE: usize = 64 * 1024;

/// Name, size and SHA-256 of one file. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Final path component of the source file
    pub name: String,
    /// Exact number of bytes the sender transmits
    pub size: u64,
    /// Hex-encoded SHA-256 of exactly those bytes
    pub hash: String,
}

impl Manifest {
    /// Build a manifest by streaming the file once through SHA-256.
    pub async fn build(path: &Path) -> TransferResult<Self> {
        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|e| TransferError::local_io(format!("opening {}", path.display()), e))?;

        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; READ_BUF_SIZE];
        let mut size = 0u64;
        loop {
            let n = file
                .read(&mut buf)
                .await
                .map_err(|e| TransferError::local_io(format!("reading {}", path.display()), e))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            size += n as u64;
        }

        let manifest = Self {
            name: file_name(&path.to_string_lossy()).to_string(),
            size,
            hash: hex::encode(hasher.finalize()),
        };
        tracing::debug!(manifest = %manifest.pretty(), "built manifest");
        Ok(manifest)
    }

    /// Build a manifest for an in-memory payload.
    pub fn for_bytes(name: impl Into<String>, data: &[u8]) -> Self {
        Self {
            name: name.into(),
            size: data.len() as u64,
            hash: hex::encode(Sha256::digest(data)),
        }
    }

    /// Raw digest bytes, used as the AAD of every chunk frame.
    pub fn hash_bytes(&self) -> TransferResult<[u8; HASH_SIZE]> {
        let mut out = [0u8; HASH_SIZE];
        hex::decode_to_slice(&self.hash, &mut out)
            .map_err(|e| TransferError::InvalidManifest(format!("hash {:?}: {e}", self.hash)))?;
        Ok(out)
    }

    /// Check everything a receiver relies on before touching the filesystem.
    pub fn validate(&self) -> TransferResult<()> {
        validate_name(&self.name)?;
        if self.hash.len() != HASH_SIZE * 2
            || !self
                .hash
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(TransferError::InvalidManifest(format!(
                "hash must be {} lowercase hex chars, got {:?}",
                HASH_SIZE * 2,
                self.hash
            )));
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> TransferResult<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| TransferError::InvalidManifest(format!("serialization: {e}")))
    }

    pub fn from_bytes(data: &[u8]) -> TransferResult<Self> {
        serde_json::from_slice(data)
            .map_err(|e| TransferError::InvalidManifest(format!("deserialization: {e}")))
    }

    /// One-line human summary, e.g. `notes.txt (12 bytes, sha256=ab12...)`.
    pub fn pretty(&self) -> String {
        format!("{} ({} bytes, sha256={})", self.name, self.size, self.hash)
    }
}

/// Final component of `path`, treating both `/` and `\` as separators.
pub fn file_name(path: &str) -> &str {
    match path.rfind(['/', '\\']) {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// A name is safe to join onto the output directory only if it is a single
/// ordinary path component.
fn validate_name(name: &str) -> TransferResult<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if bad {
        return Err(TransferError::InvalidManifest(format!(
            "file name {name:?} is not a single path component"
        )));
    }
    Ok(())
}
