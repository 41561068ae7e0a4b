//! The byte-stream capability the sender and receiver run over.

use tokio::io::{AsyncRead, AsyncWrite};

/// An ordered, reliable, bidirectional byte stream.
///
/// Implemented for every tokio reader/writer, which covers the two transports
/// sealpipe ships with: a raw `tokio::net::TcpStream` and a realtime data
/// channel adapted by [`crate::DataChannelStream`]. Closing is
/// `AsyncWriteExt::shutdown`.
pub trait ByteStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> ByteStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}
