//! Session-scoped virtual channels over UDP.
//!
//! This crate turns connectionless UDP traffic into addressable channels a
//! request pipeline can work with:
//!
//! - **Client**: [`UdpClient`] opens channels keyed by [`SessionKey`],
//!   multiplexes requests over them with [`UdpClient::fetch`] and tears them
//!   down exactly once
//! - **Server**: [`UdpServerRegistry`] creates and tracks [`UdpServer`]
//!   listener endpoints, found by port or id
//! - **Transport chain**: [`TransportChain`] routes create/get requests by
//!   scheme to the first handler that serves it
//!
//! UDP delivery semantics are unchanged: datagrams may be lost, duplicated
//! or reordered, and nothing here retransmits.
//!
//! # Client Example
//!
//! ```no_run
//! use udpchannel::{UdpClient, UdpClientConfig};
//!
//! # async fn run() -> udpchannel::Result<()> {
//! let client = UdpClient::new(UdpClientConfig::default());
//! let channel = client.connect("udp://127.0.0.1:5683").await?;
//! println!("opened {}", channel.session_key());
//!
//! channel.send(b"ping").await?;
//! client.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Server Example
//!
//! ```no_run
//! use udpchannel::{App, Pipeline, ServerQuery, UDP_SCHEME, UdpServerConfig, UdpServerRegistry};
//!
//! # async fn run() -> udpchannel::Result<()> {
//! let app = App::new();
//! app.use_middleware(|next| {
//!     Pipeline::new(move |ctx| {
//!         let next = next.clone();
//!         async move {
//!             println!("request from {}", ctx.remote_addr());
//!             next.invoke(ctx).await
//!         }
//!     })
//! })?;
//!
//! let registry = UdpServerRegistry::attach(&app);
//! let server = registry.create_server(UdpServerConfig::any_address(5683));
//! server.listen().await?;
//!
//! assert!(app.get_server(UDP_SCHEME, &ServerQuery::Port(5683)).is_some());
//! # Ok(())
//! # }
//! ```

pub mod app;
pub mod capabilities;
pub mod client;
pub mod context;
pub mod error;
pub mod pipeline;
pub mod server;
pub mod session;
mod socket;
pub mod stream;
pub mod transport;

pub use app::App;
pub use capabilities::{Capabilities, CapabilityRecord};
pub use client::{DISCONNECT_REASON, UdpClient, UdpClientConfig};
pub use context::{CONNECT_METHOD, ChannelContext, ContextId, ContextKind, RequestOptions};
pub use error::{NetworkError, Result};
pub use pipeline::{Middleware, Pipeline, PipelineBuilder, using};
pub use server::{MulticastConfig, UdpServer, UdpServerConfig, UdpServerRegistry, UdpServerState};
pub use session::{SessionKey, compute_key};
pub use stream::{Datagram, InboundStream, OutboundStream};
pub use transport::{ListenerEndpoint, ServerQuery, TransportChain, TransportHandler, UDP_SCHEME};

pub use udpchannel_core::{CancellationToken, ConnectionId, Signal};
