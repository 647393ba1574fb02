//! Scheme-dispatched transport handlers.
//!
//! Server creation and lookup requests carry a scheme token such as
//! [`UDP_SCHEME`]. A [`TransportChain`] holds the registered handlers in
//! registration order and hands each request to the first handler that
//! claims the scheme. Requests no handler claims fail on create and find
//! nothing on get.

use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use udpchannel_core::Signal;
use udpchannel_core::logging::targets;

use crate::error::{NetworkError, Result};

/// Scheme token of the UDP transport.
pub const UDP_SCHEME: &str = "udp:";

/// A listener created by a transport handler.
pub trait ListenerEndpoint: Send + Sync + 'static {
    /// Identifier of the endpoint.
    fn id(&self) -> &str;

    /// Local port, once bound.
    fn local_port(&self) -> Option<u16>;

    /// Local port of the multicast sub-endpoint, if any.
    fn multicast_port(&self) -> Option<u16> {
        None
    }

    /// Bind the endpoint and start receiving.
    fn listen(&self) -> BoxFuture<'_, Result<SocketAddr>>;

    /// Signal emitted once when the endpoint closes.
    fn closed(&self) -> &Signal<()>;

    /// Close the endpoint.
    fn close(&self);

    /// Access the concrete endpoint type.
    fn as_any(&self) -> &dyn Any;
}

/// A query selecting a listener endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerQuery {
    /// The first registered endpoint.
    First,
    /// The endpoint bound to this port, or whose multicast sub-endpoint is.
    Port(u16),
    /// The endpoint with this id.
    Id(String),
    /// A query no handler understands.
    Unsupported,
}

impl ServerQuery {
    /// Interpret a loosely typed query.
    ///
    /// `null`, `false`, `0` and `""` select the first endpoint. Whole
    /// numbers in port range select by port, including floats such as
    /// `5683.0`. Other strings select by id. Everything else is
    /// [`Unsupported`](Self::Unsupported).
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Null | Value::Bool(false) => Self::First,
            Value::Number(n) => match n.as_f64() {
                Some(f) if f == 0.0 => Self::First,
                Some(f) if f.fract() == 0.0 && (1.0..=f64::from(u16::MAX)).contains(&f) => {
                    Self::Port(f as u16)
                }
                _ => Self::Unsupported,
            },
            Value::String(s) if s.is_empty() => Self::First,
            Value::String(s) => Self::Id(s.clone()),
            _ => Self::Unsupported,
        }
    }
}

impl From<u16> for ServerQuery {
    fn from(port: u16) -> Self {
        Self::Port(port)
    }
}

impl From<&str> for ServerQuery {
    fn from(id: &str) -> Self {
        Self::Id(id.to_string())
    }
}

/// A transport that can create and find listener endpoints.
pub trait TransportHandler: Send + Sync + 'static {
    /// The scheme token this handler serves.
    fn scheme(&self) -> &str;

    /// Whether this handler serves `scheme`.
    fn matches(&self, scheme: &str) -> bool {
        self.scheme() == scheme
    }

    /// Create a listener endpoint from loosely typed options.
    fn create(&self, options: &Value) -> Result<Arc<dyn ListenerEndpoint>>;

    /// Find a listener endpoint.
    fn get(&self, query: &ServerQuery) -> Option<Arc<dyn ListenerEndpoint>>;
}

/// Ordered collection of transport handlers.
#[derive(Default)]
pub struct TransportChain {
    handlers: Mutex<Vec<Arc<dyn TransportHandler>>>,
}

impl TransportChain {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler. Earlier handlers take precedence.
    pub fn register(&self, handler: Arc<dyn TransportHandler>) {
        tracing::debug!(
            target: targets::REGISTRY,
            scheme = handler.scheme(),
            "registered transport handler"
        );
        self.handlers.lock().push(handler);
    }

    fn find(&self, scheme: &str) -> Option<Arc<dyn TransportHandler>> {
        self.handlers
            .lock()
            .iter()
            .find(|handler| handler.matches(scheme))
            .cloned()
    }

    /// Create a listener through the first handler serving `scheme`.
    pub fn create_server(&self, scheme: &str, options: &Value) -> Result<Arc<dyn ListenerEndpoint>> {
        match self.find(scheme) {
            Some(handler) => handler.create(options),
            None => {
                tracing::warn!(
                    target: targets::REGISTRY,
                    scheme,
                    "no transport provider for scheme"
                );
                Err(NetworkError::NoTransportProvider(scheme.to_string()))
            }
        }
    }

    /// Find a listener through the first handler serving `scheme`.
    pub fn get_server(&self, scheme: &str, query: &ServerQuery) -> Option<Arc<dyn ListenerEndpoint>> {
        self.find(scheme)?.get(query)
    }

    /// Schemes of all registered handlers, in order.
    pub fn schemes(&self) -> Vec<String> {
        self.handlers
            .lock()
            .iter()
            .map(|handler| handler.scheme().to_string())
            .collect()
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.lock().len()
    }

    /// Whether no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for TransportChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportChain")
            .field("schemes", &self.schemes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_from_value() {
        assert_eq!(ServerQuery::from_value(&Value::Null), ServerQuery::First);
        assert_eq!(ServerQuery::from_value(&json!(false)), ServerQuery::First);
        assert_eq!(ServerQuery::from_value(&json!(0)), ServerQuery::First);
        assert_eq!(ServerQuery::from_value(&json!("")), ServerQuery::First);
        assert_eq!(ServerQuery::from_value(&json!(9999)), ServerQuery::Port(9999));
        assert_eq!(
            ServerQuery::from_value(&json!("udp-7")),
            ServerQuery::Id("udp-7".into())
        );
        assert_eq!(ServerQuery::from_value(&json!(70000)), ServerQuery::Unsupported);
        assert_eq!(ServerQuery::from_value(&json!(-1)), ServerQuery::Unsupported);
        assert_eq!(ServerQuery::from_value(&json!(true)), ServerQuery::Unsupported);
        assert_eq!(ServerQuery::from_value(&json!([1])), ServerQuery::Unsupported);
    }

    #[test]
    fn test_whole_float_selects_port() {
        assert_eq!(ServerQuery::from_value(&json!(5683.0)), ServerQuery::Port(5683));
        assert_eq!(ServerQuery::from_value(&json!(65535.0)), ServerQuery::Port(65535));
        assert_eq!(ServerQuery::from_value(&json!(0.0)), ServerQuery::First);
        assert_eq!(ServerQuery::from_value(&json!(5683.5)), ServerQuery::Unsupported);
        assert_eq!(ServerQuery::from_value(&json!(65536.0)), ServerQuery::Unsupported);
        assert_eq!(ServerQuery::from_value(&json!(-80.0)), ServerQuery::Unsupported);
    }

    #[test]
    fn test_empty_chain() {
        let chain = TransportChain::new();
        assert!(chain.is_empty());
        assert!(chain.get_server(UDP_SCHEME, &ServerQuery::First).is_none());
        assert_eq!(
            chain.create_server(UDP_SCHEME, &Value::Null).err(),
            Some(NetworkError::NoTransportProvider("udp:".into()))
        );
    }
}
