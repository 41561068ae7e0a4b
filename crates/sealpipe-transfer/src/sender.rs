//! Sending side of a transfer.
//!
//! `AwaitPeerKey -> SessionEstablished -> ManifestSent -> Streaming -> Done`
//!
//! There is no terminator frame: the receiver stops once it has the number of
//! bytes the manifest declares.

use std::io;
use std::path::Path;

use sealpipe_core::types::{CHUNK_SIZE, MANIFEST_AAD};
use sealpipe_crypto::AeadSession;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream};
use tracing::{debug, info, warn};

use crate::error::{Step, TransferError, TransferResult};
use crate::frame::write_frame;
use crate::handshake;
use crate::manifest::Manifest;
use crate::stream::ByteStream;
use crate::ProgressFn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    AwaitPeerKey,
    SessionEstablished,
    ManifestSent,
    Streaming,
    Done,
}

/// Streams one file per connection to a [`crate::Receiver`].
#[derive(Default)]
pub struct Sender {
    progress: Option<ProgressFn>,
}

impl Sender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Run the full protocol for the file at `path`. Returns the manifest the
    /// receiver was given.
    pub async fn send_file<S: ByteStream>(&self, stream: &mut S, path: &Path) -> TransferResult<Manifest> {
        let mut stream = BufStream::new(stream);
        let session = self.establish(&mut stream).await?;

        let manifest = Manifest::build(path).await?;
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| TransferError::local_io(format!("opening {}", path.display()), e))?;

        self.transmit(&mut stream, &session, &manifest, file).await?;
        Ok(manifest)
    }

    /// Run the protocol for an arbitrary byte source described by `manifest`.
    ///
    /// The source must yield exactly `manifest.size` bytes hashing to
    /// `manifest.hash`; a size disagreement aborts the transfer.
    pub async fn send_reader<S, R>(&self, stream: &mut S, manifest: &Manifest, source: R) -> TransferResult<()>
    where
        S: ByteStream,
        R: AsyncRead + Unpin,
    {
        manifest.validate()?;
        let mut stream = BufStream::new(stream);
        let session = self.establish(&mut stream).await?;
        self.transmit(&mut stream, &session, manifest, source).await
    }

    async fn establish<S>(&self, stream: &mut S) -> TransferResult<AeadSession>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        debug!(state = ?SenderState::AwaitPeerKey, "waiting for receiver public key");
        let session = handshake::initiate(stream).await?;
        debug!(state = ?SenderState::SessionEstablished, "session established");
        Ok(session)
    }

    async fn transmit<W, R>(
        &self,
        stream: &mut W,
        session: &AeadSession,
        manifest: &Manifest,
        mut source: R,
    ) -> TransferResult<()>
    where
        W: AsyncWrite + Unpin,
        R: AsyncRead + Unpin,
    {
        let sealed = session
            .seal(&manifest.to_bytes()?, MANIFEST_AAD)
            .map_err(|e| TransferError::from_crypto(Step::Manifest, e))?;
        write_frame(stream, Step::Manifest, &sealed).await?;
        flush(stream, Step::Manifest).await?;
        debug!(state = ?SenderState::ManifestSent, manifest = %manifest.pretty(), "manifest sent");

        let aad = manifest.hash_bytes()?;
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut sent = 0u64;
        let mut index = 0u64;

        debug!(state = ?SenderState::Streaming, "streaming chunks");
        loop {
            let n = read_block(&mut source, &mut buf)
                .await
                .map_err(|e| TransferError::local_io(format!("reading {}", manifest.name), e))?;
            if n == 0 {
                break;
            }
            if sent + n as u64 > manifest.size {
                warn!(name = %manifest.name, declared = manifest.size, "source grew during transfer");
                return Err(source_changed(manifest, "grew beyond"));
            }

            let step = Step::Chunk(index);
            let sealed = session
                .seal(&buf[..n], &aad)
                .map_err(|e| TransferError::from_crypto(step, e))?;
            write_frame(stream, step, &sealed).await?;

            sent += n as u64;
            index += 1;
            if let Some(cb) = &self.progress {
                cb(sent, manifest.size, &manifest.name);
            }
        }

        if sent != manifest.size {
            warn!(name = %manifest.name, sent, declared = manifest.size, "source shrank during transfer");
            return Err(source_changed(manifest, "ended before"));
        }
        let last = match index {
            0 => Step::Manifest,
            n => Step::Chunk(n - 1),
        };
        flush(stream, last).await?;

        info!(
            state = ?SenderState::Done,
            name = %manifest.name,
            bytes = sent,
            chunks = index,
            "transfer sent"
        );
        Ok(())
    }
}

/// Fill `buf` from `source`, stopping early only at end of input.
async fn read_block<R>(source: &mut R, buf: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = source.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

async fn flush<W>(stream: &mut W, step: Step) -> TransferResult<()>
where
    W: AsyncWrite + Unpin,
{
    stream
        .flush()
        .await
        .map_err(|e| TransferError::from_stream(step, e))
}

fn source_changed(manifest: &Manifest, how: &str) -> TransferError {
    TransferError::local_io(
        format!("reading {}", manifest.name),
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("source {how} its declared size of {} bytes", manifest.size),
        ),
    )
}
