//! Channel and request contexts.
//!
//! A [`ChannelContext`] describes either a long-lived virtual channel opened
//! by [`UdpClient::connect`](crate::client::UdpClient::connect), a short-lived
//! request derived from such a channel, or a request a listener endpoint
//! built for one inbound datagram. Derived requests share the channel's
//! streams and addresses and hold a child of its cancellation token.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use udpchannel_core::{CancellationToken, ConnectionId, Signal};

use crate::client::transport::ChannelTransport;
use crate::error::{NetworkError, Result};
use crate::session::SessionKey;
use crate::stream::{Datagram, InboundStream, OutboundStream};

/// Method recorded on a channel context.
pub const CONNECT_METHOD: &str = "UDP-CONNECT";

/// Unique identifier for a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl ContextId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

/// What a context represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextKind {
    /// A virtual channel owning its socket.
    Channel,
    /// A request derived from a channel.
    Request,
    /// A request built by a listener endpoint for one inbound datagram.
    ServerRequest,
}

/// Options for a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestOptions {
    /// Request method.
    pub method: String,
    /// Request headers.
    pub headers: BTreeMap<String, String>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: "GET".to_string(),
            headers: BTreeMap::new(),
        }
    }
}

impl RequestOptions {
    /// Create default options (method `GET`, no headers).
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the method.
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    /// Add a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Fields shared by every constructor.
pub(crate) struct ContextParts {
    pub kind: ContextKind,
    pub url: String,
    pub options: RequestOptions,
    pub local_addr: SocketAddr,
    pub remote_addr: SocketAddr,
    pub outbound: OutboundStream,
    pub inbound: InboundStream,
    pub cancellation: CancellationToken,
    pub parent: Option<SessionKey>,
}

/// Signal type of the disconnect event capability.
pub type DisconnectSignal = Signal<Option<NetworkError>>;

/// State for one channel or request.
pub struct ChannelContext {
    id: ContextId,
    kind: ContextKind,
    url: String,
    options: RequestOptions,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    session_key: SessionKey,
    outbound: OutboundStream,
    inbound: InboundStream,
    cancellation: CancellationToken,
    parent: Option<SessionKey>,
    events: Mutex<Option<Arc<DisconnectSignal>>>,
    transport: Mutex<Option<ChannelTransport>>,
    disposed: AtomicBool,
}

impl ChannelContext {
    pub(crate) fn from_parts(
        parts: ContextParts,
        events: Option<Arc<DisconnectSignal>>,
        transport: Option<ChannelTransport>,
    ) -> Self {
        Self {
            id: ContextId::new(),
            kind: parts.kind,
            session_key: SessionKey::new(parts.local_addr, parts.remote_addr),
            url: parts.url,
            options: parts.options,
            local_addr: parts.local_addr,
            remote_addr: parts.remote_addr,
            outbound: parts.outbound,
            inbound: parts.inbound,
            cancellation: parts.cancellation,
            parent: parts.parent,
            events: Mutex::new(events),
            transport: Mutex::new(transport),
            disposed: AtomicBool::new(false),
        }
    }

    /// Build a request context that shares this channel's streams.
    ///
    /// The request's cancellation token is a child of this one, and its
    /// parent is this context's session key.
    pub(crate) fn derive(&self, url: String, options: RequestOptions) -> Self {
        Self::from_parts(
            ContextParts {
                kind: ContextKind::Request,
                url,
                options,
                local_addr: self.local_addr,
                remote_addr: self.remote_addr,
                outbound: self.outbound.clone(),
                inbound: self.inbound.clone(),
                cancellation: self.cancellation.child_token(),
                parent: Some(self.session_key),
            },
            None,
            None,
        )
    }

    /// Unique id of this context.
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// What this context represents.
    pub fn kind(&self) -> ContextKind {
        self.kind
    }

    /// The target URL this context was created for.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The request options.
    pub fn options(&self) -> &RequestOptions {
        &self.options
    }

    /// The request method.
    pub fn method(&self) -> &str {
        &self.options.method
    }

    /// Local socket address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Remote socket address.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// The session key of the channel this context belongs to.
    pub fn session_key(&self) -> SessionKey {
        self.session_key
    }

    /// The write side.
    pub fn outbound(&self) -> &OutboundStream {
        &self.outbound
    }

    /// The read side.
    pub fn inbound(&self) -> &InboundStream {
        &self.inbound
    }

    /// The cancellation token.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Session key of the channel this request was derived from.
    ///
    /// The reference is non-owning; resolve it with
    /// [`UdpClient::channel`](crate::client::UdpClient::channel).
    pub fn parent(&self) -> Option<SessionKey> {
        self.parent
    }

    /// Whether the disconnect event capability is still attached.
    pub fn is_open(&self) -> bool {
        self.events.lock().is_some()
    }

    /// Whether [`dispose`](Self::dispose) has run.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Subscribe to the channel's disconnect notification.
    ///
    /// The slot receives the error that caused the teardown, or `None` for
    /// an orderly disconnect. Returns `None` if the context has no attached
    /// event capability (already torn down, or not a channel).
    pub fn on_disconnect<F>(&self, f: F) -> Option<ConnectionId>
    where
        F: Fn(&Option<NetworkError>) + Send + Sync + 'static,
    {
        self.events.lock().as_ref().map(|events| events.connect(f))
    }

    /// Send one datagram to the remote endpoint.
    pub async fn send(&self, data: impl AsRef<[u8]>) -> Result<usize> {
        self.outbound.write(data).await
    }

    /// Wait for the next inbound datagram.
    pub async fn recv(&self) -> Option<Datagram> {
        self.inbound.recv().await
    }

    /// Remove the event capability. Only the first caller gets it.
    pub(crate) fn detach_events(&self) -> Option<Arc<DisconnectSignal>> {
        self.events.lock().take()
    }

    /// Remove the raw transport. Only the first caller gets it.
    pub(crate) fn take_transport(&self) -> Option<ChannelTransport> {
        self.transport.lock().take()
    }

    /// Hand the spawned receive task to the transport.
    ///
    /// If the transport was already closed the task is aborted instead.
    pub(crate) fn attach_receive_task(&self, handle: tokio::task::JoinHandle<()>) {
        match self.transport.lock().as_mut() {
            Some(transport) => transport.set_receive_task(handle),
            None => handle.abort(),
        }
    }

    /// Release the resources this context owns.
    ///
    /// Channels and server requests close their streams. Derived requests
    /// only cancel their own child token; the streams belong to the channel.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        match self.kind {
            ContextKind::Request => {}
            ContextKind::Channel | ContextKind::ServerRequest => {
                self.outbound.close();
                self.inbound.close();
            }
        }
        self.cancellation.cancel("disposed");
    }
}

impl std::fmt::Debug for ChannelContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelContext")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("url", &self.url)
            .field("session_key", &self.session_key)
            .field("parent", &self.parent)
            .field("open", &self.is_open())
            .finish()
    }
}
