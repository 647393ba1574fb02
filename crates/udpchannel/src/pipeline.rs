//! Request pipeline function type and middleware composition.
//!
//! The pipeline is the application's request handler: an async function from
//! a context to a result. Middleware wraps the pipeline built so far in
//! another layer. [`PipelineBuilder::build`] composes the registered
//! middleware exactly once; later calls return the same pipeline.

use std::future::Future;
use std::sync::{Arc, OnceLock};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use udpchannel_core::logging::targets;

use crate::context::ChannelContext;
use crate::error::{NetworkError, Result};

type PipelineFn = dyn Fn(Arc<ChannelContext>) -> BoxFuture<'static, Result<()>> + Send + Sync;

/// An async request handler.
#[derive(Clone)]
pub struct Pipeline(Arc<PipelineFn>);

impl Pipeline {
    /// Wrap an async function as a pipeline.
    ///
    /// # Example
    ///
    /// ```
    /// use udpchannel::Pipeline;
    ///
    /// let echo = Pipeline::new(|ctx| async move {
    ///     if let Some(datagram) = ctx.inbound().try_recv() {
    ///         ctx.send(&datagram.data).await?;
    ///     }
    ///     Ok(())
    /// });
    /// ```
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Arc<ChannelContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handler: Arc<PipelineFn> = Arc::new(move |ctx: Arc<ChannelContext>| f(ctx).boxed());
        Self(handler)
    }

    /// A pipeline that resolves `Ok(())` immediately.
    pub fn noop() -> Self {
        Self::new(|_| async { Ok(()) })
    }

    /// Run the pipeline for one context.
    pub fn invoke(&self, ctx: Arc<ChannelContext>) -> BoxFuture<'static, Result<()>> {
        (self.0)(ctx)
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::noop()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").finish_non_exhaustive()
    }
}

/// A layer that wraps the next pipeline.
pub type Middleware = Arc<dyn Fn(Pipeline) -> Pipeline + Send + Sync>;

/// Collects middleware and builds the application pipeline once.
#[derive(Default)]
pub struct PipelineBuilder {
    middleware: Mutex<Vec<Middleware>>,
    built: OnceLock<Pipeline>,
}

impl PipelineBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a middleware layer.
    ///
    /// Layers run in registration order: the first registered is the
    /// outermost. Fails once the pipeline has been built.
    pub fn use_middleware<F>(&self, layer: F) -> Result<()>
    where
        F: Fn(Pipeline) -> Pipeline + Send + Sync + 'static,
    {
        if self.is_built() {
            return Err(NetworkError::pipeline(
                "cannot add middleware after the pipeline is built",
            ));
        }
        self.middleware.lock().push(Arc::new(layer));
        Ok(())
    }

    /// Compose the pipeline, or return the one built earlier.
    pub fn build(&self) -> Pipeline {
        self.built
            .get_or_init(|| {
                let layers = std::mem::take(&mut *self.middleware.lock());
                tracing::debug!(
                    target: targets::REGISTRY,
                    layers = layers.len(),
                    "building application pipeline"
                );
                layers
                    .iter()
                    .rev()
                    .fold(Pipeline::noop(), |next, layer| layer(next))
            })
            .clone()
    }

    /// Whether [`build`](Self::build) has run.
    pub fn is_built(&self) -> bool {
        self.built.get().is_some()
    }
}

impl std::fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("pending", &self.middleware.lock().len())
            .field("built", &self.is_built())
            .finish()
    }
}

struct DisposeGuard(Arc<ChannelContext>);

impl Drop for DisposeGuard {
    fn drop(&mut self) {
        self.0.dispose();
    }
}

/// Run `pipeline` for `ctx`, disposing the context when the pipeline
/// settles.
///
/// The context is disposed on success, on failure, and if the returned
/// future is dropped before completion. The pipeline's result is returned
/// unchanged.
pub async fn using(ctx: Arc<ChannelContext>, pipeline: &Pipeline) -> Result<()> {
    let _guard = DisposeGuard(ctx.clone());
    pipeline.invoke(ctx).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextKind, ContextParts, RequestOptions};
    use crate::socket::SocketSlot;
    use crate::stream::{InboundStream, OutboundStream};
    use std::net::SocketAddr;
    use udpchannel_core::CancellationToken;

    async fn request() -> Arc<ChannelContext> {
        let socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let local = socket.local_addr().unwrap();
        let remote: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let slot = Arc::new(SocketSlot::new(Arc::new(socket)));
        Arc::new(ChannelContext::from_parts(
            ContextParts {
                kind: ContextKind::Request,
                url: "udp://127.0.0.1:9/".into(),
                options: RequestOptions::new(),
                local_addr: local,
                remote_addr: remote,
                outbound: OutboundStream::new(slot, remote),
                inbound: InboundStream::new(),
                cancellation: CancellationToken::new(),
                parent: None,
            },
            None,
            None,
        ))
    }

    #[tokio::test]
    async fn test_middleware_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let builder = PipelineBuilder::new();
        for name in ["outer", "inner"] {
            let order = order.clone();
            builder
                .use_middleware(move |next: Pipeline| {
                    let order = order.clone();
                    Pipeline::new(move |ctx| {
                        let order = order.clone();
                        let next = next.clone();
                        async move {
                            order.lock().push(name);
                            next.invoke(ctx).await
                        }
                    })
                })
                .unwrap();
        }

        let pipeline = builder.build();
        pipeline.invoke(request().await).await.unwrap();
        assert_eq!(*order.lock(), vec!["outer", "inner"]);
    }

    #[test]
    fn test_build_runs_once() {
        let builder = PipelineBuilder::new();
        assert!(!builder.is_built());
        builder.build();
        builder.build();
        assert!(builder.is_built());
        assert!(builder.use_middleware(|next| next).is_err());
    }

    #[tokio::test]
    async fn test_using_disposes_on_success_and_failure() {
        let ctx = request().await;
        using(ctx.clone(), &Pipeline::noop()).await.unwrap();
        assert!(ctx.is_disposed());

        let ctx = request().await;
        let failing = Pipeline::new(|_| async { Err(NetworkError::pipeline("boom")) });
        let result = using(ctx.clone(), &failing).await;
        assert_eq!(result, Err(NetworkError::Pipeline("boom".into())));
        assert!(ctx.is_disposed());
    }

    #[tokio::test]
    async fn test_using_disposes_when_dropped() {
        let ctx = request().await;
        let pending = Pipeline::new(|_| std::future::pending::<Result<()>>());
        let fut = using(ctx.clone(), &pending);
        let _ = tokio::time::timeout(std::time::Duration::from_millis(10), fut).await;
        assert!(ctx.is_disposed());
    }
}
