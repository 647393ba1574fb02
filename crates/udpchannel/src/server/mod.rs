//! Server-side listener endpoints and their registry.
//!
//! [`UdpServerRegistry`] serves the `udp:` scheme of an application's
//! transport chain. Each endpoint it creates is a [`UdpServer`] bound to
//! the application pipeline.
//!
//! # Example
//!
//! ```ignore
//! use udpchannel::{App, UdpServerConfig, UdpServerRegistry};
//!
//! let app = App::new();
//! let registry = UdpServerRegistry::attach(&app);
//!
//! let server = registry.create_server(UdpServerConfig::any_address(5683));
//! server.listen().await?;
//!
//! assert!(registry.server_by_port(5683).is_some());
//! ```

mod config;
mod endpoint;
mod registry;
mod state;

pub use config::{MulticastConfig, UdpServerConfig};
pub use endpoint::UdpServer;
pub use registry::{CAPABILITY_KEY, UdpServerRegistry};
pub use state::UdpServerState;
