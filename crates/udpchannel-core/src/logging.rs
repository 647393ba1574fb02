//! Logging facilities for udpchannel.
//!
//! udpchannel uses the `tracing` crate for instrumentation. To see logs,
//! install a tracing subscriber in your application:
//!
//! ```ignore
//! fn main() {
//!     tracing_subscriber::fmt::init();
//!
//!     // Your application code...
//! }
//! ```
//!
//! Use the constants in [`targets`] to filter by subsystem, e.g.
//! `RUST_LOG=udpchannel::client=debug`.

/// Target names for log filtering.
pub mod targets {
    /// Core crate target.
    pub const CORE: &str = "udpchannel_core";
    /// Signal/slot system target.
    pub const SIGNAL: &str = "udpchannel_core::signal";
    /// Client channel manager target.
    pub const CLIENT: &str = "udpchannel::client";
    /// Listener endpoint target.
    pub const SERVER: &str = "udpchannel::server";
    /// Server registry and transport chain target.
    pub const REGISTRY: &str = "udpchannel::registry";
    /// Performance spans.
    pub const PERF: &str = "udpchannel::perf";
}

/// A guard that keeps a tracing span entered until it is dropped.
///
/// Used to time teardown paths.
#[derive(Debug)]
pub struct PerfSpan {
    #[allow(dead_code)]
    span: tracing::span::EnteredSpan,
}

impl PerfSpan {
    /// Create a new performance span.
    ///
    /// The span will be active until the guard is dropped.
    pub fn new(name: &'static str) -> Self {
        let span = tracing::debug_span!(target: targets::PERF, "perf", operation = name);
        Self {
            span: span.entered(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perf_span_without_subscriber() {
        let span = PerfSpan::new("teardown");
        drop(span);
    }

    /// Records the target of every span and event it sees.
    #[derive(Default)]
    struct TargetRecorder {
        targets: parking_lot::Mutex<Vec<&'static str>>,
    }

    impl tracing::Subscriber for TargetRecorder {
        fn enabled(&self, _: &tracing::Metadata<'_>) -> bool {
            true
        }

        fn new_span(&self, attrs: &tracing::span::Attributes<'_>) -> tracing::span::Id {
            self.targets.lock().push(attrs.metadata().target());
            tracing::span::Id::from_u64(1)
        }

        fn record(&self, _: &tracing::span::Id, _: &tracing::span::Record<'_>) {}

        fn record_follows_from(&self, _: &tracing::span::Id, _: &tracing::span::Id) {}

        fn event(&self, event: &tracing::Event<'_>) {
            self.targets.lock().push(event.metadata().target());
        }

        fn enter(&self, _: &tracing::span::Id) {}

        fn exit(&self, _: &tracing::span::Id) {}
    }

    #[test]
    fn test_perf_span_and_cancel_use_declared_targets() {
        let recorder = std::sync::Arc::new(TargetRecorder::default());
        tracing::subscriber::with_default(recorder.clone(), || {
            let span = PerfSpan::new("channel_teardown");
            crate::CancellationToken::new().cancel("disconnect");
            drop(span);
        });

        let seen = recorder.targets.lock().clone();
        assert!(seen.contains(&targets::PERF));
        assert!(seen.contains(&targets::CORE));
    }

    #[test]
    fn test_targets_are_prefixed() {
        for target in [targets::CLIENT, targets::SERVER, targets::REGISTRY, targets::PERF] {
            assert!(target.starts_with("udpchannel::"));
        }
        assert!(targets::SIGNAL.starts_with(targets::CORE));
    }
}
