//! Key exchange: one round trip, receiver speaks first.
//!
//! ```text
//! receiver -> sender   0x01 | u32 keyLen    | public key
//! sender   -> receiver 0x02 | u32 encKeyLen | wrapped session key | base nonce (12)
//! ```
//!
//! Any unexpected tag or out-of-bounds length ends the handshake. There is no
//! renegotiation and no version fallback.

use sealpipe_core::types::{MessageTag, MAX_PUBLIC_KEY_LEN, MAX_WRAPPED_KEY_LEN};
use sealpipe_crypto::{
    generate_base_nonce, generate_session_key, AeadSession, PeerPublicKey, ReceiverKeyPair,
    BASE_NONCE_SIZE,
};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::{Step, TransferError, TransferResult};
use crate::frame::{read_array, read_tagged, write_tagged};

/// Sender side: wait for the receiver's public key, then deliver a fresh
/// session key and base nonce. Returns the sender's AEAD session.
pub async fn initiate<S>(stream: &mut S) -> TransferResult<AeadSession>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let encoded = read_tagged(
        stream,
        Step::PublicKey,
        MessageTag::PublicKey,
        1..=MAX_PUBLIC_KEY_LEN,
    )
    .await?;
    let peer = PeerPublicKey::from_bytes(&encoded)
        .map_err(|e| TransferError::from_crypto(Step::PublicKey, e))?;
    debug!(peer = %peer, "received receiver public key");

    let key = generate_session_key();
    let base_nonce = generate_base_nonce();
    let wrapped = peer
        .wrap_session_key(&key)
        .map_err(|e| TransferError::from_crypto(Step::KeyDelivery, e))?;

    write_tagged(
        stream,
        Step::KeyDelivery,
        MessageTag::KeyDelivery,
        &wrapped,
        &base_nonce,
    )
    .await?;
    stream
        .flush()
        .await
        .map_err(|e| TransferError::from_stream(Step::KeyDelivery, e))?;
    debug!(wrapped_len = wrapped.len(), "delivered session key");

    Ok(AeadSession::new(&key, base_nonce))
}

/// Receiver side: announce our public key, then recover the sender's session
/// key and base nonce. Returns the receiver's AEAD session.
pub async fn respond<S>(stream: &mut S, keys: &ReceiverKeyPair) -> TransferResult<AeadSession>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_tagged(
        stream,
        Step::PublicKey,
        MessageTag::PublicKey,
        &keys.public_key_bytes(),
        &[],
    )
    .await?;
    stream
        .flush()
        .await
        .map_err(|e| TransferError::from_stream(Step::PublicKey, e))?;
    debug!("announced public key");

    let wrapped = read_tagged(
        stream,
        Step::KeyDelivery,
        MessageTag::KeyDelivery,
        1..=MAX_WRAPPED_KEY_LEN,
    )
    .await?;
    let base_nonce: [u8; BASE_NONCE_SIZE] = read_array(stream, Step::KeyDelivery).await?;
    let key = keys
        .unwrap_session_key(&wrapped)
        .map_err(|e| TransferError::from_crypto(Step::KeyDelivery, e))?;
    debug!("session key recovered");

    Ok(AeadSession::new(&key, base_nonce))
}
