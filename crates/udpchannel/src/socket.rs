//! Shared ownership slot for a bound tokio socket.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::UdpSocket as TokioUdpSocket;

/// Holds the socket an owner may release at any time.
///
/// Writers clone the socket out of the slot for the duration of one send, so
/// the lock is never held across an `.await`. Once the owner calls
/// [`take`](Self::take) every later send sees an empty slot.
#[derive(Debug)]
pub(crate) struct SocketSlot {
    socket: Mutex<Option<Arc<TokioUdpSocket>>>,
}

impl SocketSlot {
    pub(crate) fn new(socket: Arc<TokioUdpSocket>) -> Self {
        Self {
            socket: Mutex::new(Some(socket)),
        }
    }

    /// The socket, if it has not been released.
    pub(crate) fn get(&self) -> Option<Arc<TokioUdpSocket>> {
        self.socket.lock().clone()
    }

    /// Release the socket. Returns `None` if already released.
    pub(crate) fn take(&self) -> Option<Arc<TokioUdpSocket>> {
        self.socket.lock().take()
    }
}
