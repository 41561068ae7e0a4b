//! Receiving side of a transfer.
//!
//! `AnnouncingKey -> AwaitSession -> AwaitManifest -> Receiving -> Verifying
//! -> Finalized | Failed`
//!
//! Chunks are written to `<output_dir>/<name>.part` while a running SHA-256
//! is kept. Only a file whose digest matches the manifest is renamed to its
//! final name; on any failure the `.part` file is removed.
//!
//! A name is claimed for the whole session, so two connections announcing the
//! same name never write through one `.part` file.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use sealpipe_core::types::{CHUNK_SIZE, MANIFEST_AAD, MAX_MANIFEST_FRAME_LEN};
use sealpipe_crypto::{AeadSession, ReceiverKeyPair, TAG_SIZE};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncWriteExt, BufStream};
use tracing::{debug, info, warn};

use crate::error::{Step, TransferError, TransferResult};
use crate::frame::read_frame;
use crate::handshake;
use crate::manifest::Manifest;
use crate::stream::ByteStream;
use crate::ProgressFn;

const PART_SUFFIX: &str = ".part";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    AnnouncingKey,
    AwaitSession,
    AwaitManifest,
    Receiving,
    Verifying,
    Finalized,
    Failed,
}

/// A verified file sitting under its final name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub manifest: Manifest,
    pub path: PathBuf,
}

/// Accepts one file per connection into `output_dir`.
///
/// Cheap to clone per connection: the key pair is shared read-only and
/// clones share one set of in-flight names.
#[derive(Clone)]
pub struct Receiver {
    keys: Arc<ReceiverKeyPair>,
    output_dir: PathBuf,
    in_flight: Arc<Mutex<HashSet<String>>>,
    progress: Option<Arc<dyn Fn(u64, u64, &str) + Send + Sync>>,
}

impl Receiver {
    pub fn new(keys: Arc<ReceiverKeyPair>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            keys,
            output_dir: output_dir.into(),
            in_flight: Arc::default(),
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(Arc::from(progress));
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Run the full protocol on `stream` and return the verified file.
    pub async fn receive<S: ByteStream>(&self, stream: &mut S) -> TransferResult<ReceivedFile> {
        let result = self.run(stream).await;
        if let Err(e) = &result {
            warn!(state = ?ReceiverState::Failed, error = %e, "transfer failed");
        }
        result
    }

    async fn run<S: ByteStream>(&self, stream: &mut S) -> TransferResult<ReceivedFile> {
        let mut stream = BufStream::new(stream);

        debug!(
            state = ?ReceiverState::AnnouncingKey,
            next = ?ReceiverState::AwaitSession,
            "announcing public key"
        );
        let session = handshake::respond(&mut stream, &self.keys).await?;
        debug!(state = ?ReceiverState::AwaitManifest, "session established");

        let manifest = read_manifest(&mut stream, &session).await?;
        debug!(manifest = %manifest.pretty(), "manifest accepted");

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| TransferError::local_io(format!("creating {}", self.output_dir.display()), e))?;

        // Declared before `part` so the part file is gone before the name is released.
        let _claim = NameClaim::acquire(&self.in_flight, &manifest.name)?;
        let final_path = self.output_dir.join(&manifest.name);
        let part_path = self.output_dir.join(format!("{}{PART_SUFFIX}", manifest.name));
        let mut part = PartFile::create(part_path).await?;

        debug!(state = ?ReceiverState::Receiving, path = %part.path.display(), "receiving chunks");
        let computed = self
            .receive_chunks(&mut stream, &session, &manifest, &mut part)
            .await?;

        debug!(state = ?ReceiverState::Verifying, "verifying digest");
        if computed != manifest.hash {
            warn!(
                name = %manifest.name,
                expected = %manifest.hash,
                computed = %computed,
                "hash mismatch, discarding partial file"
            );
            part.discard().await;
            return Err(TransferError::HashMismatch {
                expected: manifest.hash,
                computed,
            });
        }

        part.persist(&final_path).await?;
        info!(
            state = ?ReceiverState::Finalized,
            name = %manifest.name,
            bytes = manifest.size,
            path = %final_path.display(),
            "transfer received"
        );
        Ok(ReceivedFile {
            manifest,
            path: final_path,
        })
    }

    /// Read exactly `manifest.size` plaintext bytes into `part`, returning
    /// the hex digest of what was written.
    async fn receive_chunks<R>(
        &self,
        stream: &mut R,
        session: &AeadSession,
        manifest: &Manifest,
        part: &mut PartFile,
    ) -> TransferResult<String>
    where
        R: AsyncRead + Unpin,
    {
        let aad = manifest.hash_bytes()?;
        let bounds = (TAG_SIZE as u32 + 1)..=((CHUNK_SIZE + TAG_SIZE) as u32);
        let mut hasher = Sha256::new();
        let mut written = 0u64;
        let mut index = 0u64;

        while written < manifest.size {
            let step = Step::Chunk(index);
            let sealed = read_frame(stream, step, bounds.clone()).await?;

            let remaining = manifest.size - written;
            let plain_len = (sealed.len() - TAG_SIZE) as u64;
            if plain_len > remaining {
                return Err(TransferError::framing(
                    step,
                    format!("chunk carries {plain_len} bytes but only {remaining} remain"),
                ));
            }

            let plain = session
                .open(&sealed, &aad)
                .map_err(|e| TransferError::from_crypto(step, e))?;
            part.write(&plain).await?;
            hasher.update(&plain);

            written += plain.len() as u64;
            index += 1;
            if let Some(cb) = &self.progress {
                cb(written, manifest.size, &manifest.name);
            }
        }

        part.flush().await?;
        Ok(hex::encode(hasher.finalize()))
    }
}

async fn read_manifest<R>(stream: &mut R, session: &AeadSession) -> TransferResult<Manifest>
where
    R: AsyncRead + Unpin,
{
    let sealed = read_frame(
        stream,
        Step::Manifest,
        (TAG_SIZE as u32 + 1)..=MAX_MANIFEST_FRAME_LEN,
    )
    .await?;
    let plain = session
        .open(&sealed, MANIFEST_AAD)
        .map_err(|e| TransferError::from_crypto(Step::Manifest, e))?;
    let manifest = Manifest::from_bytes(&plain)?;
    manifest.validate()?;
    Ok(manifest)
}

/// Exclusive hold on a file name for one session, released on drop.
struct NameClaim {
    names: Arc<Mutex<HashSet<String>>>,
    name: String,
}

impl NameClaim {
    fn acquire(names: &Arc<Mutex<HashSet<String>>>, name: &str) -> TransferResult<Self> {
        let fresh = names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string());
        if !fresh {
            warn!(name, "another session is already receiving this name");
            return Err(TransferError::local_io(
                format!("claiming {name}"),
                io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{name} is already being received"),
                ),
            ));
        }
        Ok(Self {
            names: Arc::clone(names),
            name: name.to_string(),
        })
    }
}

impl Drop for NameClaim {
    fn drop(&mut self) {
        self.names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.name);
    }
}

fn closed(path: &Path) -> io::Error {
    io::Error::other(format!("{} is already closed", path.display()))
}

/// A `.part` file that is removed when dropped unless persisted.
struct PartFile {
    path: PathBuf,
    file: Option<tokio::fs::File>,
}

impl PartFile {
    /// Create (or truncate a stale) part file.
    async fn create(path: PathBuf) -> TransferResult<Self> {
        let file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| TransferError::local_io(format!("creating {}", path.display()), e))?;
        Ok(Self {
            path,
            file: Some(file),
        })
    }

    fn file(&mut self, action: &str) -> TransferResult<&mut tokio::fs::File> {
        let path = &self.path;
        self.file
            .as_mut()
            .ok_or_else(|| {
                TransferError::local_io(format!("{action} {}", path.display()), closed(path))
            })
    }

    async fn write(&mut self, data: &[u8]) -> TransferResult<()> {
        let context = format!("writing {}", self.path.display());
        self.file("writing")?
            .write_all(data)
            .await
            .map_err(|e| TransferError::local_io(context, e))
    }

    async fn flush(&mut self) -> TransferResult<()> {
        let display = self.path.display().to_string();
        let file = self.file("flushing")?;
        file.flush()
            .await
            .map_err(|e| TransferError::local_io(format!("flushing {display}"), e))?;
        file.sync_all()
            .await
            .map_err(|e| TransferError::local_io(format!("syncing {display}"), e))
    }

    /// Close and rename onto `dest`, replacing anything already there.
    async fn persist(mut self, dest: &Path) -> TransferResult<()> {
        drop(self.file.take());
        tokio::fs::rename(&self.path, dest).await.map_err(|e| {
            TransferError::local_io(
                format!("renaming {} to {}", self.path.display(), dest.display()),
                e,
            )
        })?;
        self.path = PathBuf::new();
        Ok(())
    }

    async fn discard(mut self) {
        drop(self.file.take());
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            warn!(path = %self.path.display(), error = %e, "failed to remove partial file");
        }
        self.path = PathBuf::new();
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        if self.path.as_os_str().is_empty() {
            return;
        }
        drop(self.file.take());
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "failed to remove partial file");
            }
        }
    }
}
