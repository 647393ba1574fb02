//! Error types for the UDP channel transport.

use crate::session::SessionKey;

/// Transport-level errors.
///
/// Payloads are strings so the error can travel through signals, which
/// clone their arguments for every connected slot.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkError {
    /// The OS refused to bind a socket.
    #[error("Failed to bind {address}: {message}")]
    Bind {
        /// The address that was requested.
        address: String,
        /// The underlying OS error.
        message: String,
    },
    /// I/O error on an established socket.
    #[error("I/O error: {0}")]
    Io(String),
    /// Invalid URL provided.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    /// The target host could not be resolved.
    #[error("Failed to resolve {0}")]
    Resolve(String),
    /// A channel with the same session key is already open.
    #[error("Duplicate session: {0}")]
    DuplicateSession(SessionKey),
    /// The channel has been torn down.
    #[error("Channel closed")]
    ChannelClosed,
    /// The listener endpoint is not bound.
    #[error("Socket not bound")]
    NotBound,
    /// No registered transport handles the requested scheme.
    #[error("No registered transport provider for scheme '{0}'")]
    NoTransportProvider(String),
    /// Socket-level error reported by a receive or send loop.
    #[error("UDP socket error: {0}")]
    UdpSocket(String),
    /// Error raised by a pipeline function.
    #[error("Pipeline error: {0}")]
    Pipeline(String),
    /// Configuration could not be parsed.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl NetworkError {
    /// Create a bind error for the given address.
    pub fn bind(address: impl ToString, source: &std::io::Error) -> Self {
        Self::Bind {
            address: address.to_string(),
            message: source.to_string(),
        }
    }

    /// Create a pipeline error from any message.
    pub fn pipeline(message: impl Into<String>) -> Self {
        Self::Pipeline(message.into())
    }
}

impl From<std::io::Error> for NetworkError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<url::ParseError> for NetworkError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidUrl(err.to_string())
    }
}

impl From<toml::de::Error> for NetworkError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<serde_json::Error> for NetworkError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// A specialized Result type for network operations.
pub type Result<T> = std::result::Result<T, NetworkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_error_display() {
        let io = std::io::Error::new(std::io::ErrorKind::AddrInUse, "address in use");
        let err = NetworkError::bind("0.0.0.0:9999", &io);
        assert_eq!(err.to_string(), "Failed to bind 0.0.0.0:9999: address in use");
    }

    #[test]
    fn test_no_provider_display() {
        let err = NetworkError::NoTransportProvider("tcp:".into());
        assert_eq!(
            err.to_string(),
            "No registered transport provider for scheme 'tcp:'"
        );
    }

    #[test]
    fn test_url_error_conversion() {
        let err: NetworkError = url::Url::parse("not a url").unwrap_err().into();
        assert!(matches!(err, NetworkError::InvalidUrl(_)));
    }
}
