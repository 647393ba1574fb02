//! Byte-stream adapters over datagrams.
//!
//! - [`OutboundStream`] forwards each write as one datagram to a fixed
//!   remote endpoint.
//! - [`InboundStream`] queues arriving datagrams in socket delivery order.
//!
//! Both are cheap handles: clones share the same underlying stream. A channel
//! and every request derived from it hold clones of the same pair.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;
use udpchannel_core::Signal;

use crate::error::{NetworkError, Result};
use crate::socket::SocketSlot;

/// A received datagram with its source address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Datagram {
    /// The datagram payload.
    pub data: Bytes,
    /// The source address of the datagram.
    pub source: SocketAddr,
}

impl Datagram {
    /// Create a new datagram.
    pub fn new(data: impl Into<Bytes>, source: SocketAddr) -> Self {
        Self {
            data: data.into(),
            source,
        }
    }
}

struct OutboundInner {
    slot: Arc<SocketSlot>,
    remote: SocketAddr,
    finished: AtomicBool,
    bytes_written: AtomicU64,
    on_finish: Signal<()>,
}

/// Write side of a channel.
///
/// Every [`write`](Self::write) sends one datagram to the stream's remote
/// endpoint. A failed write is reported to the writer only; it does not
/// finish the stream or tear the channel down. Calling
/// [`finish`](Self::finish) ends the stream and notifies the
/// [`finished`](Self::finished) signal, which the owning channel treats as a
/// request to disconnect.
#[derive(Clone)]
pub struct OutboundStream {
    inner: Arc<OutboundInner>,
}

impl OutboundStream {
    pub(crate) fn new(slot: Arc<SocketSlot>, remote: SocketAddr) -> Self {
        Self {
            inner: Arc::new(OutboundInner {
                slot,
                remote,
                finished: AtomicBool::new(false),
                bytes_written: AtomicU64::new(0),
                on_finish: Signal::new(),
            }),
        }
    }

    /// The endpoint every write is addressed to.
    pub fn remote_addr(&self) -> SocketAddr {
        self.inner.remote
    }

    /// Send `data` as a single datagram.
    ///
    /// Returns the number of bytes sent.
    pub async fn write(&self, data: impl AsRef<[u8]>) -> Result<usize> {
        if self.is_finished() {
            return Err(NetworkError::ChannelClosed);
        }
        let socket = self.inner.slot.get().ok_or(NetworkError::ChannelClosed)?;
        let sent = socket
            .send_to(data.as_ref(), self.inner.remote)
            .await
            .map_err(|e| NetworkError::UdpSocket(format!("Send error: {e}")))?;
        self.inner
            .bytes_written
            .fetch_add(sent as u64, Ordering::Relaxed);
        Ok(sent)
    }

    /// End the stream and emit [`finished`](Self::finished).
    ///
    /// Only the first call emits.
    pub fn finish(&self) {
        if !self.inner.finished.swap(true, Ordering::SeqCst) {
            self.inner.on_finish.emit(());
        }
    }

    /// End the stream without notifying anyone.
    pub(crate) fn close(&self) {
        self.inner.finished.store(true, Ordering::SeqCst);
    }

    /// Whether the stream has been finished or closed.
    pub fn is_finished(&self) -> bool {
        self.inner.finished.load(Ordering::SeqCst)
    }

    /// Total bytes successfully written.
    pub fn bytes_written(&self) -> u64 {
        self.inner.bytes_written.load(Ordering::Relaxed)
    }

    /// Signal emitted once when [`finish`](Self::finish) is first called.
    pub fn finished(&self) -> &Signal<()> {
        &self.inner.on_finish
    }

    /// Whether two handles refer to the same stream.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for OutboundStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundStream")
            .field("remote", &self.inner.remote)
            .field("finished", &self.is_finished())
            .field("bytes_written", &self.bytes_written())
            .finish()
    }
}

struct InboundInner {
    queue: Mutex<VecDeque<Datagram>>,
    notify: Notify,
    closed: AtomicBool,
}

/// Read side of a channel.
///
/// Datagrams are appended in the order the socket delivered them. No
/// reordering or deduplication happens here.
#[derive(Clone)]
pub struct InboundStream {
    inner: Arc<InboundInner>,
}

impl Default for InboundStream {
    fn default() -> Self {
        Self::new()
    }
}

impl InboundStream {
    /// Create an empty, open stream.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(InboundInner {
                queue: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Append a datagram. Returns `false` if the stream is closed.
    pub fn append(&self, datagram: Datagram) -> bool {
        if self.is_closed() {
            return false;
        }
        self.inner.queue.lock().push_back(datagram);
        self.inner.notify.notify_waiters();
        true
    }

    /// Wait for the next datagram.
    ///
    /// Queued datagrams are still returned after the stream is closed;
    /// `None` means closed and drained.
    pub async fn recv(&self) -> Option<Datagram> {
        loop {
            let notified = self.inner.notify.notified();
            if let Some(datagram) = self.inner.queue.lock().pop_front() {
                return Some(datagram);
            }
            if self.is_closed() {
                return None;
            }
            notified.await;
        }
    }

    /// Take the next queued datagram without waiting.
    pub fn try_recv(&self) -> Option<Datagram> {
        self.inner.queue.lock().pop_front()
    }

    /// Close the stream and wake every pending reader.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    /// Whether the stream has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Number of queued datagrams.
    pub fn len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Whether no datagrams are queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether two handles refer to the same stream.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for InboundStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundStream")
            .field("queued", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}
