//! Client-side channel management.
//!
//! [`UdpClient`] opens virtual channels over ephemeral UDP sockets, keys
//! them by [`SessionKey`](crate::SessionKey), multiplexes requests over them
//! and tears them down exactly once.
//!
//! # Example
//!
//! ```ignore
//! use udpchannel::{UdpClient, UdpClientConfig};
//!
//! let client = UdpClient::new(UdpClientConfig::default());
//! let channel = client.connect("udp://127.0.0.1:5683").await?;
//!
//! channel.on_disconnect(|err| {
//!     println!("channel closed: {:?}", err);
//! });
//!
//! channel.send(b"hello").await?;
//! if let Some(reply) = channel.recv().await {
//!     println!("{} bytes from {}", reply.data.len(), reply.source);
//! }
//! ```

mod config;
mod manager;
pub(crate) mod transport;

pub use config::UdpClientConfig;
pub use manager::{DISCONNECT_REASON, UdpClient};
