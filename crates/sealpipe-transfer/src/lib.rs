//! sealpipe-transfer: the secure file transfer protocol
//!
//! One connection carries one key exchange and one file:
//!
//! ```text
//! receiver -> sender   0x01 | u32 keyLen | public key
//! sender   -> receiver 0x02 | u32 encKeyLen | wrapped session key | base nonce(12)
//! sender   -> receiver u32 len | seal(manifest JSON, AAD = "manifest")
//! sender   -> receiver (u32 len | seal(chunk <= 1 MiB, AAD = manifest hash))*
//! ```
//!
//! Both sides run over anything implementing [`ByteStream`]: a TCP socket, an
//! in-memory duplex, or a realtime data channel wrapped in
//! [`DataChannelStream`].

pub mod channel;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod manifest;
pub mod receiver;
pub mod sender;
pub mod stream;

pub use channel::{ChannelEvent, ChannelOptions, DataChannel, DataChannelStream};
pub use error::{Step, TransferError, TransferResult};
pub use manifest::Manifest;
pub use receiver::{ReceivedFile, Receiver};
pub use sender::Sender;
pub use stream::ByteStream;

/// Progress callback type (bytes_done, bytes_total, file name)
pub type ProgressFn = Box<dyn Fn(u64, u64, &str) + Send + Sync>;
