//! Registry of listener endpoints serving the `udp:` scheme.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use udpchannel_core::logging::targets;

use super::config::UdpServerConfig;
use super::endpoint::UdpServer;
use crate::app::App;
use crate::capabilities::{Capabilities, CapabilityRecord};
use crate::error::Result;
use crate::pipeline::PipelineBuilder;
use crate::transport::{ListenerEndpoint, ServerQuery, TransportHandler, UDP_SCHEME};

/// Key of the UDP capability record.
pub const CAPABILITY_KEY: &str = "udp";

type ServerList = Mutex<Vec<Arc<UdpServer>>>;

/// Tracks the listener endpoints created for an application.
///
/// An endpoint is listed from creation until it emits
/// [`closed`](UdpServer::closed); removal matches by pointer identity.
/// The registry keeps the `local_ports` of its capability record in step
/// with the bound endpoints and their multicast sub-endpoints.
pub struct UdpServerRegistry {
    pipeline: Arc<PipelineBuilder>,
    capabilities: Capabilities,
    servers: Arc<ServerList>,
}

impl UdpServerRegistry {
    /// Create a registry and publish its capability record.
    pub fn new(pipeline: Arc<PipelineBuilder>, capabilities: Capabilities) -> Arc<Self> {
        capabilities.publish(
            CAPABILITY_KEY,
            CapabilityRecord::new(env!("CARGO_PKG_VERSION")),
        );
        Arc::new(Self {
            pipeline,
            capabilities,
            servers: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Create a registry for `app` and register it in the app's transport
    /// chain.
    pub fn attach(app: &App) -> Arc<Self> {
        let registry = Self::new(app.pipeline().clone(), app.capabilities().clone());
        app.transports().register(registry.clone());
        registry
    }

    /// Create and list an endpoint.
    ///
    /// Builds the application pipeline on first use. The endpoint is
    /// returned unbound; call [`UdpServer::listen`] to bind it.
    pub fn create_server(&self, config: UdpServerConfig) -> Arc<UdpServer> {
        let server = UdpServer::new(config, self.pipeline.build());
        self.servers.lock().push(server.clone());

        let servers = Arc::downgrade(&self.servers);
        let weak_server = Arc::downgrade(&server);
        let capabilities = self.capabilities.clone();
        server.closed.connect_once(move |_| {
            let Some(servers) = servers.upgrade() else {
                return;
            };
            servers
                .lock()
                .retain(|listed| !std::ptr::eq(Arc::as_ptr(listed), weak_server.as_ptr()));
            tracing::debug!(target: targets::REGISTRY, "endpoint removed");
            sync_ports(&servers, &capabilities);
        });

        for signal in [&server.bound, &server.multicast_bound] {
            let servers = Arc::downgrade(&self.servers);
            let capabilities = self.capabilities.clone();
            signal.connect(move |_| {
                if let Some(servers) = servers.upgrade() {
                    sync_ports(&servers, &capabilities);
                }
            });
        }

        tracing::debug!(target: targets::REGISTRY, id = server.id(), "endpoint created");
        server
    }

    /// The first listed endpoint.
    pub fn first(&self) -> Option<Arc<UdpServer>> {
        self.servers.lock().first().cloned()
    }

    /// The first endpoint bound to `port`, directly or through its
    /// multicast sub-endpoint.
    pub fn server_by_port(&self, port: u16) -> Option<Arc<UdpServer>> {
        self.servers
            .lock()
            .iter()
            .find(|server| {
                server.local_port() == Some(port)
                    || server
                        .multicast_endpoint()
                        .is_some_and(|sub| sub.local_port() == Some(port))
            })
            .cloned()
    }

    /// The first endpoint whose id is exactly `id`.
    pub fn server_by_id(&self, id: &str) -> Option<Arc<UdpServer>> {
        self.servers
            .lock()
            .iter()
            .find(|server| server.id() == id)
            .cloned()
    }

    /// Resolve a query against the listed endpoints.
    pub fn get(&self, query: &ServerQuery) -> Option<Arc<UdpServer>> {
        match query {
            ServerQuery::First => self.first(),
            ServerQuery::Port(port) => self.server_by_port(*port),
            ServerQuery::Id(id) => self.server_by_id(id),
            ServerQuery::Unsupported => None,
        }
    }

    /// All listed endpoints, in creation order.
    pub fn servers(&self) -> Vec<Arc<UdpServer>> {
        self.servers.lock().clone()
    }

    /// Number of listed endpoints.
    pub fn len(&self) -> usize {
        self.servers.lock().len()
    }

    /// Whether no endpoints are listed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The capability map this registry publishes into.
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }
}

fn sync_ports(servers: &ServerList, capabilities: &Capabilities) {
    let ports: Vec<u16> = servers
        .lock()
        .iter()
        .flat_map(|server| {
            let sub_port = server.multicast_endpoint().and_then(|sub| sub.local_port());
            [server.local_port(), sub_port]
        })
        .flatten()
        .collect();
    capabilities.update(CAPABILITY_KEY, |record| record.local_ports = ports);
}

impl TransportHandler for UdpServerRegistry {
    fn scheme(&self) -> &str {
        UDP_SCHEME
    }

    fn create(&self, options: &Value) -> Result<Arc<dyn ListenerEndpoint>> {
        let config = UdpServerConfig::from_value(options)?;
        Ok(self.create_server(config))
    }

    fn get(&self, query: &ServerQuery) -> Option<Arc<dyn ListenerEndpoint>> {
        UdpServerRegistry::get(self, query).map(|server| server as Arc<dyn ListenerEndpoint>)
    }
}

impl std::fmt::Debug for UdpServerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpServerRegistry")
            .field("servers", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Arc<UdpServerRegistry> {
        UdpServerRegistry::new(Arc::new(PipelineBuilder::new()), Capabilities::new())
    }

    #[test]
    fn test_publishes_capability_record() {
        let registry = registry();
        let record = registry.capabilities().get(CAPABILITY_KEY).unwrap();
        assert_eq!(record.version, env!("CARGO_PKG_VERSION"));
        assert!(record.local_ports.is_empty());
    }

    #[test]
    fn test_create_builds_pipeline_once() {
        let pipeline = Arc::new(PipelineBuilder::new());
        let registry = UdpServerRegistry::new(pipeline.clone(), Capabilities::new());
        assert!(!pipeline.is_built());

        registry.create_server(UdpServerConfig::default());
        registry.create_server(UdpServerConfig::default());
        assert!(pipeline.is_built());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_close_removes_only_that_endpoint() {
        let registry = registry();
        let a = registry.create_server(UdpServerConfig::default().id("a"));
        let b = registry.create_server(UdpServerConfig::default().id("b"));

        a.close();
        a.close();
        assert_eq!(registry.len(), 1);
        assert!(registry.server_by_id("a").is_none());
        assert!(Arc::ptr_eq(&registry.first().unwrap(), &b));
    }

    #[test]
    fn test_unbound_endpoints_have_no_port() {
        let registry = registry();
        registry.create_server(UdpServerConfig::default());
        assert!(registry.server_by_port(0).is_none());
        assert!(registry.get(&ServerQuery::Unsupported).is_none());
    }
}
