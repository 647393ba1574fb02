//! The client channel manager.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use futures_util::future::join_all;
use parking_lot::Mutex;
use tokio::net::UdpSocket as TokioUdpSocket;
use tokio::task::JoinHandle;
use udpchannel_core::logging::targets;
use udpchannel_core::{CancellationToken, PerfSpan, Signal};
use url::{Host, Url};

use super::config::UdpClientConfig;
use super::transport::{ChannelTransport, receive_loop};
use crate::context::{CONNECT_METHOD, ChannelContext, ContextKind, ContextParts, RequestOptions};
use crate::error::{NetworkError, Result};
use crate::pipeline::{Pipeline, using};
use crate::session::SessionKey;
use crate::socket::SocketSlot;
use crate::stream::{InboundStream, OutboundStream};

/// Reason recorded on a channel's token when it is torn down.
pub const DISCONNECT_REASON: &str = "disconnect";

/// What a completed teardown leaves behind.
struct Teardown {
    receive_task: Option<JoinHandle<()>>,
}

/// Turns a connectionless UDP socket into session-scoped channels.
///
/// Every [`connect`](Self::connect) binds a fresh ephemeral socket and
/// registers the resulting channel under its [`SessionKey`]. Requests are
/// multiplexed over an open channel with [`fetch`](Self::fetch).
///
/// # Signals
///
/// - [`channel_opened`](Self::channel_opened): Emitted after a channel is registered
/// - [`channel_closed`](Self::channel_closed): Emitted after a channel is torn down
///
/// # Example
///
/// ```no_run
/// use udpchannel::{RequestOptions, UdpClient, UdpClientConfig};
///
/// # async fn run() -> udpchannel::Result<()> {
/// let client = UdpClient::new(UdpClientConfig::default());
/// let channel = client.connect("udp://127.0.0.1:5683").await?;
///
/// channel.send(b"ping").await?;
/// client.fetch(&channel, "/status", RequestOptions::new(), None).await?;
///
/// client.close().await;
/// # Ok(())
/// # }
/// ```
pub struct UdpClient {
    config: UdpClientConfig,
    channels: Mutex<HashMap<SessionKey, Arc<ChannelContext>>>,

    /// Signal emitted after a channel is registered.
    pub channel_opened: Signal<SessionKey>,
    /// Signal emitted after a channel is torn down.
    pub channel_closed: Signal<SessionKey>,
}

impl UdpClient {
    /// Create a channel manager with the given configuration.
    pub fn new(config: UdpClientConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            channels: Mutex::new(HashMap::new()),
            channel_opened: Signal::new(),
            channel_closed: Signal::new(),
        })
    }

    /// The manager's configuration.
    pub fn config(&self) -> &UdpClientConfig {
        &self.config
    }

    /// Open a channel to `url` (`udp://host:port`).
    ///
    /// Binds an ephemeral local port of the remote's address family and
    /// starts receiving. The channel stays registered until it is
    /// disconnected.
    pub async fn connect(self: &Arc<Self>, url: &str) -> Result<Arc<ChannelContext>> {
        let parsed = Url::parse(url)?;
        let remote = resolve(&parsed).await?;

        let bind_addr = SocketAddr::new(self.config.bind_address_for(&remote.ip()), 0);
        let socket = TokioUdpSocket::bind(bind_addr)
            .await
            .map_err(|e| NetworkError::bind(bind_addr, &e))?;
        let local = socket.local_addr()?;
        let socket = Arc::new(socket);

        let slot = Arc::new(SocketSlot::new(socket.clone()));
        let outbound = OutboundStream::new(slot.clone(), remote);
        let inbound = InboundStream::new();
        let cancellation = CancellationToken::new();

        let channel = Arc::new(ChannelContext::from_parts(
            ContextParts {
                kind: ContextKind::Channel,
                url: url.to_string(),
                options: RequestOptions::new().method(CONNECT_METHOD),
                local_addr: local,
                remote_addr: remote,
                outbound: outbound.clone(),
                inbound: inbound.clone(),
                cancellation: cancellation.clone(),
                parent: None,
            },
            Some(Arc::new(Signal::new())),
            Some(ChannelTransport::new(slot)),
        ));
        let key = channel.session_key();
        self.register(channel.clone())?;

        let client = Arc::downgrade(self);
        let weak_channel = Arc::downgrade(&channel);
        outbound.finished().connect_once(move |_| {
            if let (Some(client), Some(channel)) = (client.upgrade(), weak_channel.upgrade()) {
                client.disconnect(&channel, None);
            }
        });

        let client = Arc::downgrade(self);
        let weak_channel = Arc::downgrade(&channel);
        let task = tokio::spawn(receive_loop(
            socket,
            inbound,
            cancellation,
            self.config.recv_buffer_size,
            move |err| {
                if let (Some(client), Some(channel)) = (client.upgrade(), weak_channel.upgrade()) {
                    client.disconnect(&channel, Some(err));
                }
            },
        ));
        channel.attach_receive_task(task);

        tracing::debug!(target: targets::CLIENT, session = %key, url, "channel opened");
        self.channel_opened.emit(key);
        Ok(channel)
    }

    /// Insert a channel under its session key unless the key is taken.
    fn register(&self, channel: Arc<ChannelContext>) -> Result<()> {
        let key = channel.session_key();
        let mut channels = self.channels.lock();
        if channels.contains_key(&key) {
            tracing::warn!(target: targets::CLIENT, session = %key, "duplicate session");
            return Err(NetworkError::DuplicateSession(key));
        }
        channels.insert(key, channel);
        Ok(())
    }

    /// Run one request over an open channel.
    ///
    /// The request context's URL is the channel URL with `path` appended.
    /// It shares the channel's socket, streams and addresses, and is
    /// disposed once `pipeline` settles. Without a pipeline the request
    /// resolves immediately.
    pub async fn fetch(
        &self,
        channel: &Arc<ChannelContext>,
        path: &str,
        options: RequestOptions,
        pipeline: Option<&Pipeline>,
    ) -> Result<()> {
        if !channel.is_open() || !self.is_registered(channel) {
            return Err(NetworkError::ChannelClosed);
        }

        let request = Arc::new(channel.derive(format!("{}{}", channel.url(), path), options));
        tracing::trace!(
            target: targets::CLIENT,
            session = %channel.session_key(),
            url = request.url(),
            method = request.method(),
            "fetch"
        );

        let pipeline = pipeline.cloned().unwrap_or_default();
        using(request, &pipeline).await
    }

    /// Tear a channel down.
    ///
    /// Notifies disconnect subscribers with `error`, cancels the channel's
    /// token, unregisters it, releases its socket and closes its streams.
    /// Returns `false` without doing anything if the channel was already
    /// torn down.
    pub fn disconnect(&self, channel: &Arc<ChannelContext>, error: Option<NetworkError>) -> bool {
        self.teardown(channel, error).is_some()
    }

    fn teardown(
        &self,
        channel: &Arc<ChannelContext>,
        error: Option<NetworkError>,
    ) -> Option<Teardown> {
        let events = channel.detach_events()?;
        let _span = PerfSpan::new("channel_teardown");
        let key = channel.session_key();

        events.emit(error.clone());
        channel.cancellation().cancel(DISCONNECT_REASON);

        {
            let mut channels = self.channels.lock();
            if channels
                .get(&key)
                .is_some_and(|registered| Arc::ptr_eq(registered, channel))
            {
                channels.remove(&key);
            }
        }

        let receive_task = channel.take_transport().and_then(ChannelTransport::close);
        channel.dispose();

        match &error {
            Some(err) => {
                tracing::warn!(target: targets::CLIENT, session = %key, error = %err, "channel closed on error")
            }
            None => tracing::debug!(target: targets::CLIENT, session = %key, "channel closed"),
        }
        self.channel_closed.emit(key);

        Some(Teardown { receive_task })
    }

    /// Disconnect every open channel and wait until their sockets are
    /// released.
    pub async fn close(&self) {
        let drained: Vec<Arc<ChannelContext>> =
            self.channels.lock().drain().map(|(_, channel)| channel).collect();
        if drained.is_empty() {
            return;
        }

        let tasks: Vec<JoinHandle<()>> = drained
            .iter()
            .filter_map(|channel| self.teardown(channel, None))
            .filter_map(|teardown| teardown.receive_task)
            .collect();

        tracing::debug!(
            target: targets::CLIENT,
            channels = drained.len(),
            "closing all channels"
        );

        for result in join_all(tasks).await {
            if let Err(e) = result
                && !e.is_cancelled()
            {
                tracing::warn!(target: targets::CLIENT, error = %e, "receive task failed");
            }
        }
    }

    /// The open channel registered under `key`.
    pub fn channel(&self, key: &SessionKey) -> Option<Arc<ChannelContext>> {
        self.channels.lock().get(key).cloned()
    }

    /// The open channel a request was derived from.
    pub fn parent_of(&self, request: &ChannelContext) -> Option<Arc<ChannelContext>> {
        request.parent().and_then(|key| self.channel(&key))
    }

    /// Number of open channels.
    pub fn channel_count(&self) -> usize {
        self.channels.lock().len()
    }

    /// Session keys of all open channels, sorted.
    pub fn session_keys(&self) -> Vec<SessionKey> {
        let mut keys: Vec<SessionKey> = self.channels.lock().keys().copied().collect();
        keys.sort();
        keys
    }

    fn is_registered(&self, channel: &Arc<ChannelContext>) -> bool {
        self.channels
            .lock()
            .get(&channel.session_key())
            .is_some_and(|registered| Arc::ptr_eq(registered, channel))
    }
}

impl std::fmt::Debug for UdpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpClient")
            .field("config", &self.config)
            .field("channels", &self.channel_count())
            .finish()
    }
}

/// Resolve the target of a `udp://host:port` URL. The first address wins.
async fn resolve(url: &Url) -> Result<SocketAddr> {
    let port = url
        .port()
        .ok_or_else(|| NetworkError::InvalidUrl(format!("missing port in '{url}'")))?;

    match url.host() {
        Some(Host::Ipv4(ip)) => Ok(SocketAddr::new(IpAddr::V4(ip), port)),
        Some(Host::Ipv6(ip)) => Ok(SocketAddr::new(IpAddr::V6(ip), port)),
        Some(Host::Domain(domain)) => {
            if let Ok(ip) = domain.parse::<IpAddr>() {
                return Ok(SocketAddr::new(ip, port));
            }
            tokio::net::lookup_host((domain, port))
                .await
                .map_err(|e| NetworkError::Resolve(format!("{domain}: {e}")))?
                .next()
                .ok_or_else(|| NetworkError::Resolve(domain.to_string()))
        }
        None => Err(NetworkError::InvalidUrl(format!("missing host in '{url}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_literal_hosts() {
        let v4 = resolve(&Url::parse("udp://127.0.0.1:9999").unwrap()).await.unwrap();
        assert_eq!(v4, "127.0.0.1:9999".parse().unwrap());

        let v6 = resolve(&Url::parse("udp://[::1]:5683").unwrap()).await.unwrap();
        assert_eq!(v6, "[::1]:5683".parse().unwrap());
    }

    #[tokio::test]
    async fn test_resolve_requires_port() {
        let err = resolve(&Url::parse("udp://127.0.0.1").unwrap()).await.unwrap_err();
        assert!(matches!(err, NetworkError::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_url() {
        let client = UdpClient::new(UdpClientConfig::default());
        assert!(matches!(
            client.connect("not a url").await,
            Err(NetworkError::InvalidUrl(_))
        ));
        assert_eq!(client.channel_count(), 0);
    }

    #[tokio::test]
    async fn test_finish_disconnects_channel() {
        let client = UdpClient::new(UdpClientConfig::default());
        let channel = client.connect("udp://127.0.0.1:9").await.unwrap();

        channel.outbound().finish();
        assert_eq!(client.channel_count(), 0);
        assert!(!channel.is_open());
        assert_eq!(
            channel.cancellation().reason().as_deref(),
            Some(DISCONNECT_REASON)
        );
    }

    #[tokio::test]
    async fn test_disconnect_reports_error_to_subscribers() {
        let client = UdpClient::new(UdpClientConfig::default());
        let channel = client.connect("udp://127.0.0.1:9").await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        channel
            .on_disconnect(move |err| seen_clone.lock().push(err.clone()))
            .unwrap();

        let err = NetworkError::UdpSocket("Receive error: reset".into());
        assert!(client.disconnect(&channel, Some(err.clone())));
        assert!(!client.disconnect(&channel, None));
        assert_eq!(*seen.lock(), vec![Some(err)]);
    }

    fn detached_channel(socket: &Arc<TokioUdpSocket>, remote: SocketAddr) -> Arc<ChannelContext> {
        let slot = Arc::new(SocketSlot::new(socket.clone()));
        Arc::new(ChannelContext::from_parts(
            ContextParts {
                kind: ContextKind::Channel,
                url: format!("udp://{remote}"),
                options: RequestOptions::new().method(CONNECT_METHOD),
                local_addr: socket.local_addr().unwrap(),
                remote_addr: remote,
                outbound: OutboundStream::new(slot.clone(), remote),
                inbound: InboundStream::new(),
                cancellation: CancellationToken::new(),
                parent: None,
            },
            Some(Arc::new(Signal::new())),
            Some(ChannelTransport::new(slot)),
        ))
    }

    #[tokio::test]
    async fn test_register_rejects_duplicate_session() {
        let client = UdpClient::new(UdpClientConfig::default());
        let socket = Arc::new(TokioUdpSocket::bind("127.0.0.1:0").await.unwrap());
        let remote: SocketAddr = "127.0.0.1:5683".parse().unwrap();

        let first = detached_channel(&socket, remote);
        let second = detached_channel(&socket, remote);
        let key = first.session_key();
        assert_eq!(second.session_key(), key);

        client.register(first.clone()).unwrap();
        assert_eq!(
            client.register(second.clone()),
            Err(NetworkError::DuplicateSession(key))
        );

        assert_eq!(client.channel_count(), 1);
        assert!(Arc::ptr_eq(&client.channel(&key).unwrap(), &first));

        assert!(client.disconnect(&second, None));
        assert!(Arc::ptr_eq(&client.channel(&key).unwrap(), &first));
        assert!(first.is_open());
    }

    #[tokio::test]
    async fn test_fetch_on_closed_channel_fails() {
        let client = UdpClient::new(UdpClientConfig::default());
        let channel = client.connect("udp://127.0.0.1:9").await.unwrap();
        client.disconnect(&channel, None);

        let result = client.fetch(&channel, "/", RequestOptions::new(), None).await;
        assert_eq!(result, Err(NetworkError::ChannelClosed));
    }
}
