//! Session keys identifying open channels.
//!
//! A channel is identified by its four-tuple of local and remote address and
//! port, rendered canonically as `"{localAddr}:{localPort}-{remoteAddr}:{remotePort}"`.
//! The local half is only known once the OS has assigned a port, so keys are
//! built after binding completes and never change afterwards.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::NetworkError;

/// Render the canonical session key string for a four-tuple.
///
/// Identical inputs always produce identical output, and the output differs
/// whenever any component differs. IPv6 addresses are written without
/// brackets.
///
/// ```
/// use udpchannel::compute_key;
///
/// let key = compute_key(
///     "127.0.0.1".parse().unwrap(),
///     50123,
///     "127.0.0.1".parse().unwrap(),
///     9999,
/// );
/// assert_eq!(key, "127.0.0.1:50123-127.0.0.1:9999");
/// ```
pub fn compute_key(
    local_addr: IpAddr,
    local_port: u16,
    remote_addr: IpAddr,
    remote_port: u16,
) -> String {
    format!("{local_addr}:{local_port}-{remote_addr}:{remote_port}")
}

/// The identity of a channel: its local and remote endpoints.
///
/// Equality, hashing and ordering follow the address/port pairs only, so
/// IPv6 flow info and scope ids never split one session into two.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionKey {
    local_addr: IpAddr,
    local_port: u16,
    remote_addr: IpAddr,
    remote_port: u16,
}

impl SessionKey {
    /// Build a key from bound local and target remote socket addresses.
    pub fn new(local: SocketAddr, remote: SocketAddr) -> Self {
        Self {
            local_addr: local.ip(),
            local_port: local.port(),
            remote_addr: remote.ip(),
            remote_port: remote.port(),
        }
    }

    /// The local address.
    pub fn local_addr(&self) -> IpAddr {
        self.local_addr
    }

    /// The local port assigned at bind time.
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// The remote address.
    pub fn remote_addr(&self) -> IpAddr {
        self.remote_addr
    }

    /// The remote port.
    pub fn remote_port(&self) -> u16 {
        self.remote_port
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&compute_key(
            self.local_addr,
            self.local_port,
            self.remote_addr,
            self.remote_port,
        ))
    }
}

fn parse_half(half: &str, whole: &str) -> Result<(IpAddr, u16), NetworkError> {
    let invalid = || NetworkError::InvalidUrl(format!("malformed session key '{whole}'"));
    let (addr, port) = half.rsplit_once(':').ok_or_else(invalid)?;
    let addr = addr.parse::<IpAddr>().map_err(|_| invalid())?;
    let port = port.parse::<u16>().map_err(|_| invalid())?;
    Ok((addr, port))
}

impl FromStr for SessionKey {
    type Err = NetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Neither IPv4 nor IPv6 text contains '-'.
        let (local, remote) = s
            .split_once('-')
            .ok_or_else(|| NetworkError::InvalidUrl(format!("malformed session key '{s}'")))?;
        let (local_addr, local_port) = parse_half(local, s)?;
        let (remote_addr, remote_port) = parse_half(remote, s)?;
        Ok(Self {
            local_addr,
            local_port,
            remote_addr,
            remote_port,
        })
    }
}

impl TryFrom<String> for SessionKey {
    type Error = NetworkError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SessionKey> for String {
    fn from(key: SessionKey) -> Self {
        key.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_canonical_format() {
        let key = SessionKey::new(addr("0.0.0.0:50000"), addr("127.0.0.1:9999"));
        assert_eq!(key.to_string(), "0.0.0.0:50000-127.0.0.1:9999");
    }

    #[test]
    fn test_ipv6_has_no_brackets() {
        let key = SessionKey::new(addr("[::]:40000"), addr("[::1]:5683"));
        assert_eq!(key.to_string(), ":::40000-::1:5683");
    }

    #[test]
    fn test_compute_key_matches_display() {
        let local = addr("10.0.0.2:1234");
        let remote = addr("10.0.0.9:80");
        assert_eq!(
            compute_key(local.ip(), local.port(), remote.ip(), remote.port()),
            SessionKey::new(local, remote).to_string()
        );
    }

    #[test]
    fn test_distinct_components_give_distinct_keys() {
        let keys: HashSet<String> = [
            ("127.0.0.1:1000", "127.0.0.1:2000"),
            ("127.0.0.1:1001", "127.0.0.1:2000"),
            ("127.0.0.2:1000", "127.0.0.1:2000"),
            ("127.0.0.1:1000", "127.0.0.1:2001"),
            ("127.0.0.1:1000", "127.0.0.2:2000"),
        ]
        .iter()
        .map(|(l, r)| SessionKey::new(addr(l), addr(r)).to_string())
        .collect();
        assert_eq!(keys.len(), 5);
    }

    #[test]
    fn test_scope_id_does_not_split_sessions() {
        let a = SessionKey::new(addr("[fe80::1%1]:1000"), addr("[fe80::2]:2000"));
        let b = SessionKey::new(addr("[fe80::1%2]:1000"), addr("[fe80::2]:2000"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_parse_round_trips_ipv6() {
        let key = SessionKey::new(addr("[::]:40000"), addr("[2001:db8::7]:5683"));
        let parsed: SessionKey = key.to_string().parse().unwrap();
        assert_eq!(parsed, key);
        assert_eq!(parsed.remote_port(), 5683);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("127.0.0.1:1-".parse::<SessionKey>().is_err());
        assert!("nonsense".parse::<SessionKey>().is_err());
        assert!("127.0.0.1:99999-127.0.0.1:1".parse::<SessionKey>().is_err());
    }

    #[test]
    fn test_serializes_as_string() {
        let key = SessionKey::new(addr("127.0.0.1:1"), addr("127.0.0.1:2"));
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"127.0.0.1:1-127.0.0.1:2\"");
        let back: SessionKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }
}
