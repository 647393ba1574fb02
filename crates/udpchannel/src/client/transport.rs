//! Raw socket ownership and the receive loop of a channel.

use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UdpSocket as TokioUdpSocket;
use tokio::task::JoinHandle;
use udpchannel_core::CancellationToken;
use udpchannel_core::logging::targets;

use crate::error::NetworkError;
use crate::socket::SocketSlot;
use crate::stream::{Datagram, InboundStream};

/// The socket and receive task a channel owns.
pub(crate) struct ChannelTransport {
    slot: Arc<SocketSlot>,
    receive_task: Option<JoinHandle<()>>,
}

impl ChannelTransport {
    pub(crate) fn new(slot: Arc<SocketSlot>) -> Self {
        Self {
            slot,
            receive_task: None,
        }
    }

    pub(crate) fn set_receive_task(&mut self, handle: JoinHandle<()>) {
        self.receive_task = Some(handle);
    }

    /// Release the socket and hand back the receive task.
    ///
    /// The task stops on its own once the channel's token is cancelled; the
    /// socket is dropped when it does.
    pub(crate) fn close(mut self) -> Option<JoinHandle<()>> {
        self.slot.take();
        self.receive_task.take()
    }
}

/// Append every datagram the socket delivers to `inbound` until `token` is
/// cancelled or the stream closes.
///
/// A receive error ends the loop and is passed to `on_error`.
pub(crate) async fn receive_loop<F>(
    socket: Arc<TokioUdpSocket>,
    inbound: InboundStream,
    token: CancellationToken,
    buffer_size: usize,
    on_error: F,
) where
    F: FnOnce(NetworkError) + Send,
{
    let mut buffer = vec![0u8; buffer_size];
    let mut on_error = Some(on_error);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,

            result = socket.recv_from(&mut buffer) => {
                match result {
                    Ok((n, source)) => {
                        let datagram = Datagram::new(Bytes::copy_from_slice(&buffer[..n]), source);
                        if !inbound.append(datagram) {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            target: targets::CLIENT,
                            error = %e,
                            "receive error, tearing channel down"
                        );
                        if let Some(on_error) = on_error.take() {
                            on_error(NetworkError::UdpSocket(format!("Receive error: {}", e)));
                        }
                        break;
                    }
                }
            }
        }
    }

    tracing::trace!(target: targets::CLIENT, "receive loop finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_loop_appends_and_stops_on_cancel() {
        let socket = Arc::new(TokioUdpSocket::bind("127.0.0.1:0").await.unwrap());
        let addr = socket.local_addr().unwrap();
        let inbound = InboundStream::new();
        let token = CancellationToken::new();

        let task = tokio::spawn(receive_loop(
            socket.clone(),
            inbound.clone(),
            token.clone(),
            1024,
            |_| {},
        ));

        let peer = TokioUdpSocket::bind("127.0.0.1:0").await.unwrap();
        peer.send_to(b"one", addr).await.unwrap();
        peer.send_to(b"two", addr).await.unwrap();

        for _ in 0..100 {
            if inbound.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(&inbound.try_recv().unwrap().data[..], b"one");
        let second = inbound.try_recv().unwrap();
        assert_eq!(&second.data[..], b"two");
        assert_eq!(second.source, peer.local_addr().unwrap());

        token.cancel("disconnect");
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_close_releases_slot() {
        let socket = Arc::new(TokioUdpSocket::bind("127.0.0.1:0").await.unwrap());
        let slot = Arc::new(SocketSlot::new(socket));
        let mut transport = ChannelTransport::new(slot.clone());
        transport.set_receive_task(tokio::spawn(async {}));

        let handle = transport.close();
        assert!(handle.is_some());
        assert!(slot.get().is_none());
    }
}
