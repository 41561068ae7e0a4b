//! Wire framing (all integers big-endian)
//!
//! ```text
//! tagged message:  [1 byte: tag][4 bytes: len][len bytes: body][trailer]
//! sealed frame:    [4 bytes: len][len bytes: ciphertext]
//! ```
//!
//! Declared lengths are checked against caller-supplied bounds before any
//! buffer is allocated, so a hostile peer cannot make us reserve gigabytes.

use std::ops::RangeInclusive;

use sealpipe_core::types::MessageTag;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Step, TransferError, TransferResult};

/// Write `[tag][u32 len][body][trailer]`. Does not flush.
pub async fn write_tagged<W>(
    writer: &mut W,
    step: Step,
    tag: MessageTag,
    body: &[u8],
    trailer: &[u8],
) -> TransferResult<()>
where
    W: AsyncWrite + Unpin,
{
    let len = body_len(step, body)?;
    let io = async {
        writer.write_u8(tag.as_byte()).await?;
        writer.write_u32(len).await?;
        writer.write_all(body).await?;
        writer.write_all(trailer).await
    };
    io.await.map_err(|e| TransferError::from_stream(step, e))
}

/// Read a tagged message header and body, requiring `expected` as the tag
/// and a body length inside `bounds`.
pub async fn read_tagged<R>(
    reader: &mut R,
    step: Step,
    expected: MessageTag,
    bounds: RangeInclusive<u32>,
) -> TransferResult<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let tag = reader
        .read_u8()
        .await
        .map_err(|e| TransferError::from_stream(step, e))?;
    if tag != expected.as_byte() {
        return Err(TransferError::framing(
            step,
            format!(
                "unexpected message tag 0x{tag:02x} (expected 0x{:02x})",
                expected.as_byte()
            ),
        ));
    }
    read_body(reader, step, bounds).await
}

/// Write `[u32 len][payload]`. Does not flush.
pub async fn write_frame<W>(writer: &mut W, step: Step, payload: &[u8]) -> TransferResult<()>
where
    W: AsyncWrite + Unpin,
{
    let len = body_len(step, payload)?;
    let io = async {
        writer.write_u32(len).await?;
        writer.write_all(payload).await
    };
    io.await.map_err(|e| TransferError::from_stream(step, e))
}

/// Read one `[u32 len][payload]` frame whose length must fall in `bounds`.
pub async fn read_frame<R>(
    reader: &mut R,
    step: Step,
    bounds: RangeInclusive<u32>,
) -> TransferResult<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    read_body(reader, step, bounds).await
}

/// Read exactly `N` raw bytes (e.g. the base nonce trailer).
pub async fn read_array<R, const N: usize>(reader: &mut R, step: Step) -> TransferResult<[u8; N]>
where
    R: AsyncRead + Unpin,
{
    let mut out = [0u8; N];
    reader
        .read_exact(&mut out)
        .await
        .map_err(|e| TransferError::from_stream(step, e))?;
    Ok(out)
}

async fn read_body<R>(
    reader: &mut R,
    step: Step,
    bounds: RangeInclusive<u32>,
) -> TransferResult<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let len = reader
        .read_u32()
        .await
        .map_err(|e| TransferError::from_stream(step, e))?;
    if !bounds.contains(&len) {
        return Err(TransferError::framing(
            step,
            format!(
                "declared length {len} outside {}..={}",
                bounds.start(),
                bounds.end()
            ),
        ));
    }
    let mut body = vec![0u8; len as usize];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| TransferError::from_stream(step, e))?;
    Ok(body)
}

fn body_len(step: Step, body: &[u8]) -> TransferResult<u32> {
    u32::try_from(body.len())
        .map_err(|_| TransferError::framing(step, format!("{} bytes exceed u32 length prefix", body.len())))
}
