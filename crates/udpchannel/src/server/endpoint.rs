//! UDP listener endpoint with signal-based event delivery.

use std::any::Any;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, join_all};
use parking_lot::Mutex;
use tokio::net::UdpSocket as TokioUdpSocket;
use tokio::task::JoinHandle;
use udpchannel_core::logging::targets;
use udpchannel_core::{CancellationToken, Signal};

use super::config::{MulticastConfig, UdpServerConfig};
use super::state::UdpServerState;
use crate::context::{ChannelContext, ContextKind, ContextParts, RequestOptions};
use crate::error::{NetworkError, Result};
use crate::pipeline::{Pipeline, using};
use crate::socket::SocketSlot;
use crate::stream::{Datagram, InboundStream, OutboundStream};
use crate::transport::ListenerEndpoint;

/// Internal state for the listener endpoint.
struct UdpServerInner {
    state: UdpServerState,
    local_addr: Option<SocketAddr>,
}

fn generate_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("udp-{}", COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// A UDP listener endpoint bound to the application pipeline.
///
/// Every datagram the endpoint receives becomes a server request context
/// whose inbound stream holds that datagram and whose outbound stream
/// replies to its sender. The context is handed to the pipeline and
/// disposed when the pipeline settles.
///
/// # Signals
///
/// - [`bound`](Self::bound): Emitted when the endpoint is bound successfully
/// - [`multicast_bound`](Self::multicast_bound): Emitted when the multicast sub-endpoint is bound
/// - [`datagram_received`](Self::datagram_received): Emitted when a datagram is received
/// - [`closed`](Self::closed): Emitted once when the endpoint is closed
/// - [`error`](Self::error): Emitted when an error occurs
///
/// # Example
///
/// ```ignore
/// let server = UdpServer::new(UdpServerConfig::any_address(5683), pipeline);
///
/// server.bound.connect(|addr| {
///     println!("Listening on {}", addr);
/// });
///
/// server.listen().await?;
/// ```
pub struct UdpServer {
    id: String,
    config: UdpServerConfig,
    pipeline: Pipeline,
    this: Weak<UdpServer>,
    inner: Mutex<UdpServerInner>,
    slot: Mutex<Option<Arc<SocketSlot>>>,
    token: CancellationToken,
    receive_task: Mutex<Option<JoinHandle<()>>>,
    multicast: Mutex<Option<Arc<UdpServer>>>,
    is_closed: AtomicBool,

    /// Signal emitted when the endpoint is bound successfully.
    pub bound: Signal<SocketAddr>,
    /// Signal emitted when the multicast sub-endpoint is bound.
    pub multicast_bound: Signal<SocketAddr>,
    /// Signal emitted when a datagram is received.
    pub datagram_received: Signal<Datagram>,
    /// Signal emitted once when the endpoint is closed.
    pub closed: Signal<()>,
    /// Signal emitted when an error occurs.
    pub error: Signal<NetworkError>,
}

impl UdpServer {
    /// Create an unbound endpoint that hands requests to `pipeline`.
    pub fn new(config: UdpServerConfig, pipeline: Pipeline) -> Arc<Self> {
        let id = config.id.clone().unwrap_or_else(generate_id);
        Arc::new_cyclic(|this| Self {
            id,
            config,
            pipeline,
            this: this.clone(),
            inner: Mutex::new(UdpServerInner {
                state: UdpServerState::Unbound,
                local_addr: None,
            }),
            slot: Mutex::new(None),
            token: CancellationToken::new(),
            receive_task: Mutex::new(None),
            multicast: Mutex::new(None),
            is_closed: AtomicBool::new(false),
            bound: Signal::new(),
            multicast_bound: Signal::new(),
            datagram_received: Signal::new(),
            closed: Signal::new(),
            error: Signal::new(),
        })
    }

    /// The endpoint identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The endpoint configuration.
    pub fn config(&self) -> &UdpServerConfig {
        &self.config
    }

    /// Get the current endpoint state.
    pub fn state(&self) -> UdpServerState {
        self.inner.lock().state
    }

    /// Check if the endpoint is bound.
    pub fn is_bound(&self) -> bool {
        self.inner.lock().state == UdpServerState::Bound
    }

    /// Check if the endpoint has been closed.
    pub fn is_closed(&self) -> bool {
        self.is_closed.load(Ordering::SeqCst)
    }

    /// Get the local address after binding.
    /// Returns `None` if the endpoint is not bound.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.lock().local_addr
    }

    /// Get the local port after binding.
    pub fn local_port(&self) -> Option<u16> {
        self.local_addr().map(|addr| addr.port())
    }

    /// The multicast sub-endpoint, once bound.
    pub fn multicast_endpoint(&self) -> Option<Arc<UdpServer>> {
        self.multicast.lock().clone()
    }

    /// Bind the endpoint and start receiving.
    ///
    /// If a multicast sub-endpoint is configured it is bound afterwards;
    /// its failures are reported through [`error`](Self::error) and do not
    /// fail the call. Listening on an already bound endpoint returns its
    /// address.
    pub async fn listen(&self) -> Result<SocketAddr> {
        let local_addr = self.bind(None).await?;

        let has_multicast = self.multicast.lock().is_some();
        if !has_multicast
            && let Some(multicast) = &self.config.multicast
            && let Some(sub_config) = self.config.multicast_endpoint(&self.id)
        {
            let sub = UdpServer::new(sub_config, self.pipeline.clone());
            match sub.bind(Some(multicast)).await {
                Ok(addr) => {
                    tracing::debug!(
                        target: targets::SERVER,
                        id = %self.id,
                        %addr,
                        "multicast endpoint bound"
                    );
                    *self.multicast.lock() = Some(sub.clone());
                    if self.is_closed() {
                        sub.close();
                    } else {
                        self.multicast_bound.emit(addr);
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        target: targets::SERVER,
                        id = %self.id,
                        error = %e,
                        "multicast endpoint failed to bind"
                    );
                    self.error.emit(e);
                }
            }
        }

        Ok(local_addr)
    }

    async fn bind(&self, multicast: Option<&MulticastConfig>) -> Result<SocketAddr> {
        {
            let mut inner = self.inner.lock();
            match inner.state {
                UdpServerState::Bound => return inner.local_addr.ok_or(NetworkError::NotBound),
                UdpServerState::Binding => {
                    return Err(NetworkError::UdpSocket("Bind already in progress".into()));
                }
                UdpServerState::Closed => return Err(NetworkError::ChannelClosed),
                UdpServerState::Unbound => inner.state = UdpServerState::Binding,
            }
        }

        let socket = match TokioUdpSocket::bind((self.config.bind_address.as_str(), self.config.port)).await {
            Ok(s) => s,
            Err(e) => {
                let err = NetworkError::bind(self.config.bind_addr(), &e);
                self.fail_bind(&err);
                return Err(err);
            }
        };

        let local_addr = match socket.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                let err = NetworkError::UdpSocket(format!("Failed to get local address: {}", e));
                self.fail_bind(&err);
                return Err(err);
            }
        };

        if self.config.broadcast
            && let Err(e) = socket.set_broadcast(true)
        {
            self.error.emit(NetworkError::UdpSocket(format!(
                "Failed to enable broadcast: {}",
                e
            )));
        }

        if let Some(multicast) = multicast {
            self.apply_multicast(&socket, multicast);
        }

        let socket = Arc::new(socket);
        let slot = Arc::new(SocketSlot::new(socket.clone()));
        {
            let mut inner = self.inner.lock();
            if self.is_closed() {
                inner.state = UdpServerState::Closed;
                slot.take();
                return Err(NetworkError::ChannelClosed);
            }
            inner.state = UdpServerState::Bound;
            inner.local_addr = Some(local_addr);
            *self.slot.lock() = Some(slot.clone());
        }

        let task = tokio::spawn(serve(
            self.this.clone(),
            socket,
            slot,
            local_addr,
            self.token.clone(),
            self.config.recv_buffer_size,
        ));
        *self.receive_task.lock() = Some(task);

        tracing::debug!(target: targets::SERVER, id = %self.id, %local_addr, "endpoint bound");
        self.bound.emit(local_addr);
        Ok(local_addr)
    }

    fn fail_bind(&self, err: &NetworkError) {
        {
            let mut inner = self.inner.lock();
            if inner.state == UdpServerState::Binding {
                inner.state = UdpServerState::Unbound;
            }
        }
        tracing::warn!(target: targets::SERVER, id = %self.id, error = %err, "bind failed");
        self.error.emit(err.clone());
    }

    fn apply_multicast(&self, socket: &TokioUdpSocket, multicast: &MulticastConfig) {
        if multicast.ttl > 0
            && let Err(e) = socket.set_multicast_ttl_v4(multicast.ttl)
        {
            self.error.emit(NetworkError::UdpSocket(format!(
                "Failed to set multicast TTL: {}",
                e
            )));
        }

        if let Err(e) = socket.set_multicast_loop_v4(multicast.loopback) {
            self.error.emit(NetworkError::UdpSocket(format!(
                "Failed to set multicast loopback: {}",
                e
            )));
        }

        for (multicast_addr, interface) in &multicast.groups {
            let iface = interface.unwrap_or(Ipv4Addr::UNSPECIFIED);
            if let Err(e) = socket.join_multicast_v4(*multicast_addr, iface) {
                self.error.emit(NetworkError::UdpSocket(format!(
                    "Failed to join multicast group {}: {}",
                    multicast_addr, e
                )));
            }
        }
    }

    fn dispatch(&self, datagram: Datagram, local_addr: SocketAddr, slot: &Arc<SocketSlot>) {
        self.datagram_received.emit(datagram.clone());

        let source = datagram.source;
        let inbound = InboundStream::new();
        inbound.append(datagram);
        inbound.close();

        let request = Arc::new(ChannelContext::from_parts(
            ContextParts {
                kind: ContextKind::ServerRequest,
                url: format!("udp://{}", local_addr),
                options: RequestOptions::new(),
                local_addr,
                remote_addr: source,
                outbound: OutboundStream::new(slot.clone(), source),
                inbound,
                cancellation: self.token.child_token(),
                parent: None,
            },
            None,
            None,
        ));

        let pipeline = self.pipeline.clone();
        let id = self.id.clone();
        tokio::spawn(async move {
            if let Err(e) = using(request, &pipeline).await {
                tracing::warn!(
                    target: targets::SERVER,
                    id = %id,
                    %source,
                    error = %e,
                    "pipeline failed"
                );
            }
        });
    }

    /// Close the endpoint and its multicast sub-endpoint.
    ///
    /// Releases the socket, cancels in-flight requests and emits
    /// [`closed`](Self::closed). Only the first call has any effect.
    pub fn close(&self) {
        if self.is_closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.token.cancel("close");
        {
            let mut inner = self.inner.lock();
            inner.state = UdpServerState::Closed;
            inner.local_addr = None;
        }
        if let Some(slot) = self.slot.lock().take() {
            slot.take();
        }
        let sub = self.multicast.lock().clone();
        if let Some(sub) = sub {
            sub.close();
        }

        tracing::debug!(target: targets::SERVER, id = %self.id, "endpoint closed");
        self.closed.emit(());
    }

    /// Close the endpoint and wait for its receive tasks to finish.
    pub async fn shutdown(&self) {
        self.close();

        let mut tasks: Vec<JoinHandle<()>> = self.receive_task.lock().take().into_iter().collect();
        let sub = self.multicast.lock().clone();
        if let Some(sub) = sub {
            tasks.extend(sub.receive_task.lock().take());
        }

        for result in join_all(tasks).await {
            if let Err(e) = result
                && !e.is_cancelled()
            {
                tracing::warn!(target: targets::SERVER, id = %self.id, error = %e, "receive task failed");
            }
        }
    }
}

impl Drop for UdpServer {
    fn drop(&mut self) {
        self.token.cancel("dropped");
    }
}

/// Receive datagrams until the endpoint's token is cancelled.
async fn serve(
    server: Weak<UdpServer>,
    socket: Arc<TokioUdpSocket>,
    slot: Arc<SocketSlot>,
    local_addr: SocketAddr,
    token: CancellationToken,
    buffer_size: usize,
) {
    let mut buffer = vec![0u8; buffer_size];

    loop {
        tokio::select! {
            _ = token.cancelled() => break,

            result = socket.recv_from(&mut buffer) => {
                let Some(server) = server.upgrade() else {
                    break;
                };
                match result {
                    Ok((n, source)) => {
                        let datagram = Datagram::new(Bytes::copy_from_slice(&buffer[..n]), source);
                        server.dispatch(datagram, local_addr, &slot);
                    }
                    Err(e) => {
                        tracing::warn!(target: targets::SERVER, id = %server.id, error = %e, "receive error");
                        server.error.emit(NetworkError::UdpSocket(format!("Receive error: {}", e)));
                    }
                }
            }
        }
    }

    tracing::trace!(target: targets::SERVER, %local_addr, "receive loop finished");
}

impl ListenerEndpoint for UdpServer {
    fn id(&self) -> &str {
        &self.id
    }

    fn local_port(&self) -> Option<u16> {
        UdpServer::local_port(self)
    }

    fn multicast_port(&self) -> Option<u16> {
        self.multicast_endpoint().and_then(|sub| sub.local_port())
    }

    fn listen(&self) -> BoxFuture<'_, Result<SocketAddr>> {
        UdpServer::listen(self).boxed()
    }

    fn closed(&self) -> &Signal<()> {
        &self.closed
    }

    fn close(&self) {
        UdpServer::close(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl std::fmt::Debug for UdpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpServer")
            .field("id", &self.id)
            .field("bind_addr", &self.config.bind_addr())
            .field("state", &self.state())
            .field("local_addr", &self.local_addr())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn loopback() -> UdpServerConfig {
        UdpServerConfig::new("127.0.0.1", 0)
    }

    #[tokio::test]
    async fn test_listen_and_close() {
        let server = UdpServer::new(loopback(), Pipeline::noop());
        assert_eq!(server.state(), UdpServerState::Unbound);

        let closes = Arc::new(AtomicUsize::new(0));
        let closes_clone = closes.clone();
        server.closed.connect(move |_| {
            closes_clone.fetch_add(1, Ordering::SeqCst);
        });

        let addr = server.listen().await.unwrap();
        assert!(server.is_bound());
        assert_eq!(server.local_port(), Some(addr.port()));
        assert_eq!(server.listen().await.unwrap(), addr);

        server.shutdown().await;
        server.close();
        assert_eq!(server.state(), UdpServerState::Closed);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(server.listen().await, Err(NetworkError::ChannelClosed));
    }

    #[tokio::test]
    async fn test_bind_failure_reports_error() {
        let holder = UdpServer::new(loopback(), Pipeline::noop());
        let port = holder.listen().await.unwrap().port();

        let server = UdpServer::new(UdpServerConfig::new("127.0.0.1", port), Pipeline::noop());
        let errors = Arc::new(AtomicUsize::new(0));
        let errors_clone = errors.clone();
        server.error.connect(move |_| {
            errors_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert!(matches!(server.listen().await, Err(NetworkError::Bind { .. })));
        assert_eq!(server.state(), UdpServerState::Unbound);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        holder.shutdown().await;
    }

    #[tokio::test]
    async fn test_pipeline_replies_to_sender() {
        let echo = Pipeline::new(|ctx| async move {
            if let Some(datagram) = ctx.inbound().try_recv() {
                ctx.send(&datagram.data).await?;
            }
            Ok(())
        });
        let server = UdpServer::new(loopback(), echo);
        let addr = server.listen().await.unwrap();

        let peer = TokioUdpSocket::bind("127.0.0.1:0").await.unwrap();
        peer.send_to(b"echo", addr).await.unwrap();

        let mut buf = [0u8; 16];
        let (n, from) = tokio::time::timeout(Duration::from_secs(2), peer.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], b"echo");
        assert_eq!(from, addr);

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_generated_ids_are_unique() {
        let a = UdpServer::new(UdpServerConfig::default(), Pipeline::noop());
        let b = UdpServer::new(UdpServerConfig::default(), Pipeline::noop());
        assert_ne!(a.id(), b.id());
        assert!(a.id().starts_with("udp-"));

        let named = UdpServer::new(UdpServerConfig::default().id("coap"), Pipeline::noop());
        assert_eq!(named.id(), "coap");
    }
}
