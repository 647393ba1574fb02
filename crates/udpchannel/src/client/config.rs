//! Configuration types for the channel manager.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Configuration for a [`UdpClient`](super::UdpClient).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UdpClientConfig {
    /// Local address channels to IPv4 targets bind to.
    pub bind_address_v4: Ipv4Addr,
    /// Local address channels to IPv6 targets bind to.
    pub bind_address_v6: Ipv6Addr,
    /// Receive buffer size in bytes. Longer datagrams are truncated.
    pub recv_buffer_size: usize,
}

impl Default for UdpClientConfig {
    fn default() -> Self {
        Self {
            bind_address_v4: Ipv4Addr::UNSPECIFIED,
            bind_address_v6: Ipv6Addr::UNSPECIFIED,
            recv_buffer_size: 65535,
        }
    }
}

impl UdpClientConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the IPv4 bind address.
    pub fn bind_address_v4(mut self, addr: Ipv4Addr) -> Self {
        self.bind_address_v4 = addr;
        self
    }

    /// Set the IPv6 bind address.
    pub fn bind_address_v6(mut self, addr: Ipv6Addr) -> Self {
        self.bind_address_v6 = addr;
        self
    }

    /// Set the receive buffer size.
    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = size;
        self
    }

    /// The local address to bind for a target of the given family.
    pub fn bind_address_for(&self, remote: &IpAddr) -> IpAddr {
        match remote {
            IpAddr::V4(_) => IpAddr::V4(self.bind_address_v4),
            IpAddr::V6(_) => IpAddr::V6(self.bind_address_v6),
        }
    }

    /// Parse a configuration from TOML. Missing fields take their defaults.
    pub fn from_toml(source: &str) -> Result<Self> {
        Ok(toml::from_str(source)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_matches_remote() {
        let config = UdpClientConfig::new().bind_address_v4(Ipv4Addr::LOCALHOST);
        assert_eq!(
            config.bind_address_for(&"10.1.2.3".parse().unwrap()),
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        );
        assert_eq!(
            config.bind_address_for(&"::1".parse().unwrap()),
            IpAddr::V6(Ipv6Addr::UNSPECIFIED)
        );
    }

    #[test]
    fn test_from_toml_partial() {
        let config = UdpClientConfig::from_toml("recv_buffer_size = 1500\n").unwrap();
        assert_eq!(config.recv_buffer_size, 1500);
        assert_eq!(config.bind_address_v4, Ipv4Addr::UNSPECIFIED);
    }

    #[test]
    fn test_from_toml_rejects_bad_address() {
        assert!(UdpClientConfig::from_toml("bind_address_v4 = \"nope\"\n").is_err());
    }
}
