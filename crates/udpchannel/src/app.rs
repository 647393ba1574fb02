//! Application holder: pipeline, capabilities and transport chain.

use std::sync::Arc;

use serde_json::Value;

use crate::capabilities::Capabilities;
use crate::error::Result;
use crate::pipeline::{Pipeline, PipelineBuilder};
use crate::transport::{ListenerEndpoint, ServerQuery, TransportChain};

/// The application a transport serves.
///
/// Owns the pipeline builder, the capability map transports publish into,
/// and the chain server requests are routed through.
///
/// # Example
///
/// ```no_run
/// use udpchannel::{App, UDP_SCHEME, UdpServerRegistry};
///
/// # async fn run() -> udpchannel::Result<()> {
/// let app = App::new();
/// UdpServerRegistry::attach(&app);
///
/// let server = app.create_server(UDP_SCHEME, &serde_json::json!({ "port": 5683 }))?;
/// server.listen().await?;
/// assert!(app.get_server(UDP_SCHEME, &5683u16.into()).is_some());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct App {
    pipeline: Arc<PipelineBuilder>,
    capabilities: Capabilities,
    transports: Arc<TransportChain>,
}

impl App {
    /// Create an application with an empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an application publishing into an existing capability map.
    pub fn with_capabilities(capabilities: Capabilities) -> Self {
        Self {
            capabilities,
            ..Self::default()
        }
    }

    /// Register a middleware layer. See [`PipelineBuilder::use_middleware`].
    pub fn use_middleware<F>(&self, layer: F) -> Result<()>
    where
        F: Fn(Pipeline) -> Pipeline + Send + Sync + 'static,
    {
        self.pipeline.use_middleware(layer)
    }

    /// Build the pipeline once and return it.
    pub fn build(&self) -> Pipeline {
        self.pipeline.build()
    }

    /// Whether the pipeline has been built.
    pub fn is_built(&self) -> bool {
        self.pipeline.is_built()
    }

    /// The pipeline builder.
    pub fn pipeline(&self) -> &Arc<PipelineBuilder> {
        &self.pipeline
    }

    /// The capability map.
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// The transport chain.
    pub fn transports(&self) -> &Arc<TransportChain> {
        &self.transports
    }

    /// Create a listener through the transport serving `scheme`.
    pub fn create_server(&self, scheme: &str, options: &Value) -> Result<Arc<dyn ListenerEndpoint>> {
        self.transports.create_server(scheme, options)
    }

    /// Find a listener through the transport serving `scheme`.
    pub fn get_server(&self, scheme: &str, query: &ServerQuery) -> Option<Arc<dyn ListenerEndpoint>> {
        self.transports.get_server(scheme, query)
    }
}
