//! Byte-stream adapter over a message-oriented realtime data channel.
//!
//! The channel delivers discrete messages through an event subscription and
//! exposes its outbound buffer level. [`DataChannelStream`] turns that into an
//! ordered [`AsyncRead`] + [`AsyncWrite`] stream:
//!
//! - inbound messages are queued unbounded, in arrival order, by a single
//!   worker task; reads split messages across calls as needed
//! - writes are cut into fragments of at most `fragment_size` bytes and block
//!   while the channel buffers more than `high_water_mark` bytes, waking on the
//!   low-water notification or every `poll_interval`, whichever comes first
//! - close is idempotent and wakes every blocked reader and writer; reads
//!   drain what was already queued and then see end-of-stream

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use sealpipe_core::config::ChannelConfig;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// The outbound half of a realtime data channel, as seen by the adapter.
///
/// Implementations are driven from async tasks and must not block.
pub trait DataChannel: Send + Sync + 'static {
    /// Queue one message for delivery.
    fn send(&self, data: Bytes) -> io::Result<()>;

    /// Bytes queued by `send` that the channel has not yet transmitted.
    fn buffered_amount(&self) -> u64;

    /// Emit [`ChannelEvent::BufferedAmountLow`] once the buffered amount drops
    /// to `threshold` or below.
    fn set_buffered_amount_low_threshold(&self, threshold: u64);

    fn close(&self) -> io::Result<()>;
}

/// Events the channel publishes to its subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Message(Bytes),
    BufferedAmountLow,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOptions {
    /// Largest message handed to [`DataChannel::send`]
    pub fragment_size: usize,
    /// Threshold registered for the low-water notification
    pub low_water_mark: u64,
    /// Writers block while the channel buffers more than this
    pub high_water_mark: u64,
    /// Upper bound on how long a blocked writer waits before rechecking
    pub poll_interval: Duration,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        ChannelOptions::from(&ChannelConfig::default())
    }
}

impl From<&ChannelConfig> for ChannelOptions {
    fn from(config: &ChannelConfig) -> Self {
        Self {
            fragment_size: config.fragment_size,
            low_water_mark: config.low_water_mark,
            high_water_mark: config.high_water_mark,
            poll_interval: config.poll_interval(),
        }
    }
}

struct Shared {
    drained: Notify,
    closed: CancellationToken,
    close_requested: AtomicBool,
}

impl Shared {
    /// Mark the stream closed and release every waiter.
    fn shut(&self) {
        self.closed.cancel();
        self.drained.notify_waiters();
    }
}

type DrainWait = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Ordered byte stream over a [`DataChannel`].
pub struct DataChannelStream<C: DataChannel> {
    channel: Arc<C>,
    options: ChannelOptions,
    inbound: mpsc::UnboundedReceiver<Bytes>,
    current: Bytes,
    shared: Arc<Shared>,
    backpressure: Option<DrainWait>,
}

impl<C: DataChannel> DataChannelStream<C> {
    /// Wrap `channel`, consuming its event subscription.
    ///
    /// Spawns the inbound worker, so this must be called within a tokio
    /// runtime.
    pub fn new(
        channel: Arc<C>,
        events: mpsc::UnboundedReceiver<ChannelEvent>,
        options: ChannelOptions,
    ) -> Self {
        channel.set_buffered_amount_low_threshold(options.low_water_mark);

        let shared = Arc::new(Shared {
            drained: Notify::new(),
            closed: CancellationToken::new(),
            close_requested: AtomicBool::new(false),
        });
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        tokio::spawn(run_inbound(events, inbound_tx, shared.clone()));

        Self {
            channel,
            options,
            inbound,
            current: Bytes::new(),
            shared,
            backpressure: None,
        }
    }

    pub fn options(&self) -> &ChannelOptions {
        &self.options
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.is_cancelled()
    }

    /// Close the stream. Only the first call reaches the channel.
    pub fn close(&self) -> io::Result<()> {
        self.shared.shut();
        if self.shared.close_requested.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        debug!("closing data channel");
        self.channel.close()
    }
}

/// Inbound worker: forwards messages in order until the channel closes, the
/// stream is closed locally, or the stream is dropped.
async fn run_inbound(
    mut events: mpsc::UnboundedReceiver<ChannelEvent>,
    inbound: mpsc::UnboundedSender<Bytes>,
    shared: Arc<Shared>,
) {
    loop {
        tokio::select! {
            _ = shared.closed.cancelled() => break,
            event = events.recv() => match event {
                Some(ChannelEvent::Message(data)) => {
                    if inbound.send(data).is_err() {
                        break;
                    }
                }
                Some(ChannelEvent::BufferedAmountLow) => shared.drained.notify_one(),
                Some(ChannelEvent::Closed) | None => {
                    debug!("data channel closed by peer");
                    break;
                }
            },
        }
    }
    shared.shut();
}

async fn wait_for_drain(shared: Arc<Shared>, poll_interval: Duration) {
    tokio::select! {
        _ = shared.drained.notified() => {}
        _ = shared.closed.cancelled() => {}
        _ = tokio::time::sleep(poll_interval) => {}
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "data channel closed")
}

impl<C: DataChannel> AsyncRead for DataChannelStream<C> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        while this.current.is_empty() {
            match ready!(this.inbound.poll_recv(cx)) {
                Some(message) => this.current = message,
                // worker gone and queue drained
                None => return Poll::Ready(Ok(())),
            }
        }
        let n = buf.remaining().min(this.current.len());
        buf.put_slice(&this.current.split_to(n));
        Poll::Ready(Ok(()))
    }
}

impl<C: DataChannel> AsyncWrite for DataChannelStream<C> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = &mut *self;
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        loop {
            if let Some(wait) = this.backpressure.as_mut() {
                ready!(wait.as_mut().poll(cx));
                this.backpressure = None;
            }
            if this.shared.closed.is_cancelled() {
                return Poll::Ready(Err(closed_error()));
            }

            let buffered = this.channel.buffered_amount();
            if buffered <= this.options.high_water_mark {
                let n = buf.len().min(this.options.fragment_size);
                this.channel.send(Bytes::copy_from_slice(&buf[..n]))?;
                return Poll::Ready(Ok(n));
            }

            trace!(buffered, high_water_mark = this.options.high_water_mark, "write blocked on backpressure");
            this.backpressure = Some(Box::pin(wait_for_drain(
                this.shared.clone(),
                this.options.poll_interval,
            )));
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(self.close())
    }
}

impl<C: DataChannel> Drop for DataChannelStream<C> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            debug!(error = %e, "data channel close failed on drop");
        }
    }
}
