//! Configuration types for listener endpoints.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Configuration for a [`UdpServer`](super::UdpServer).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UdpServerConfig {
    /// Identifier used by id lookups. Generated if not set.
    pub id: Option<String>,
    /// The address to bind to.
    pub bind_address: String,
    /// The port to bind to. Use 0 for an OS-assigned port.
    pub port: u16,
    /// Receive buffer size in bytes.
    pub recv_buffer_size: usize,
    /// Enable broadcast mode.
    pub broadcast: bool,
    /// Secondary multicast endpoint sharing this endpoint's identity.
    pub multicast: Option<MulticastConfig>,
}

impl Default for UdpServerConfig {
    fn default() -> Self {
        Self {
            id: None,
            bind_address: "0.0.0.0".into(),
            port: 0,
            recv_buffer_size: 65535,
            broadcast: false,
            multicast: None,
        }
    }
}

impl UdpServerConfig {
    /// Create a configuration that binds to the specified address and port.
    pub fn new(bind_address: impl Into<String>, port: u16) -> Self {
        Self {
            bind_address: bind_address.into(),
            port,
            ..Default::default()
        }
    }

    /// Create a configuration that binds to any address on the specified port.
    pub fn any_address(port: u16) -> Self {
        Self::new("0.0.0.0", port)
    }

    /// Set the endpoint identifier.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Enable broadcast mode.
    pub fn broadcast(mut self, enabled: bool) -> Self {
        self.broadcast = enabled;
        self
    }

    /// Set the receive buffer size.
    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = size;
        self
    }

    /// Add a multicast sub-endpoint.
    pub fn multicast_config(mut self, config: MulticastConfig) -> Self {
        self.multicast = Some(config);
        self
    }

    /// Get the bind address string (address:port).
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    /// Configuration of the multicast sub-endpoint, if one is set.
    pub(crate) fn multicast_endpoint(&self, id: &str) -> Option<UdpServerConfig> {
        self.multicast.as_ref().map(|multicast| UdpServerConfig {
            id: Some(id.to_string()),
            bind_address: "0.0.0.0".into(),
            port: multicast.port,
            recv_buffer_size: self.recv_buffer_size,
            broadcast: false,
            multicast: None,
        })
    }

    /// Parse loosely typed creation options. `null` means all defaults.
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_value(value.clone())?)
    }

    /// Parse a configuration from TOML. Missing fields take their defaults.
    pub fn from_toml(source: &str) -> Result<Self> {
        Ok(toml::from_str(source)?)
    }
}

/// Configuration for a multicast sub-endpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MulticastConfig {
    /// Port the sub-endpoint binds on all interfaces.
    pub port: u16,
    /// Groups to join on bind. Each entry is (multicast_addr, interface_addr).
    /// If interface_addr is None, uses INADDR_ANY.
    pub groups: Vec<(Ipv4Addr, Option<Ipv4Addr>)>,
    /// Whether to receive own multicast messages.
    pub loopback: bool,
    /// TTL for multicast packets.
    pub ttl: u32,
}

impl MulticastConfig {
    /// Create a multicast configuration binding the given port.
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    /// Add a multicast group to join.
    pub fn join_group(mut self, multicast_addr: Ipv4Addr) -> Self {
        self.groups.push((multicast_addr, None));
        self
    }

    /// Add a multicast group with a specific interface.
    pub fn join_group_on(mut self, multicast_addr: Ipv4Addr, interface: Ipv4Addr) -> Self {
        self.groups.push((multicast_addr, Some(interface)));
        self
    }

    /// Enable or disable multicast loopback.
    pub fn loopback(mut self, enabled: bool) -> Self {
        self.loopback = enabled;
        self
    }

    /// Set the multicast TTL.
    pub fn ttl(mut self, ttl: u32) -> Self {
        self.ttl = ttl;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_value() {
        let config = UdpServerConfig::from_value(&json!({"port": 9999, "id": "coap"})).unwrap();
        assert_eq!(config.port, 9999);
        assert_eq!(config.id.as_deref(), Some("coap"));
        assert_eq!(config.bind_address, "0.0.0.0");

        assert_eq!(
            UdpServerConfig::from_value(&serde_json::Value::Null).unwrap(),
            UdpServerConfig::default()
        );
        assert!(UdpServerConfig::from_value(&json!({"port": "x"})).is_err());
    }

    #[test]
    fn test_from_toml_with_multicast() {
        let config = UdpServerConfig::from_toml(
            r#"
            port = 5683

            [multicast]
            port = 5684
            groups = [["224.0.1.187", "0.0.0.0"]]
            loopback = true
            "#,
        )
        .unwrap();

        let multicast = config.multicast.clone().unwrap();
        assert_eq!(multicast.port, 5684);
        assert_eq!(
            multicast.groups,
            vec![(Ipv4Addr::new(224, 0, 1, 187), Some(Ipv4Addr::UNSPECIFIED))]
        );

        let sub = config.multicast_endpoint("udp-1").unwrap();
        assert_eq!(sub.port, 5684);
        assert_eq!(sub.id.as_deref(), Some("udp-1"));
        assert!(sub.multicast.is_none());
    }

    #[test]
    fn test_builder() {
        let config = UdpServerConfig::any_address(9999)
            .id("main")
            .broadcast(true)
            .multicast_config(MulticastConfig::new(5684).join_group(Ipv4Addr::new(224, 0, 1, 187)));
        assert_eq!(config.bind_addr(), "0.0.0.0:9999");
        assert!(config.broadcast);
    }
}
