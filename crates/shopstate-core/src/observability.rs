//! Observability sink for render-timing observations
//!
//! Fire-and-forget `info`/`warn` channel. The timing recorder writes here
//! instead of into shared state.

use std::sync::Arc;

/// Destination for informational and warning observations
///
/// Implementations must not block and should not panic; the recorder
/// swallows panics from a sink regardless.
pub trait ObservationSink: Send + Sync {
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
}

/// Sink forwarding to `tracing` under the `shopstate::timing` target
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ObservationSink for TracingSink {
    fn info(&self, message: &str) {
        tracing::info!(target: "shopstate::timing", "{}", message);
    }

    fn warn(&self, message: &str) {
        tracing::warn!(target: "shopstate::timing", "{}", message);
    }
}

/// Sink that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpSink;

impl ObservationSink for NoOpSink {
    fn info(&self, _message: &str) {}

    fn warn(&self, _message: &str) {}
}

/// Logging sink in development builds, no-op in release builds
pub fn default_sink() -> Arc<dyn ObservationSink> {
    cfg_if::cfg_if! {
        if #[cfg(debug_assertions)] {
            Arc::new(TracingSink)
        } else {
            Arc::new(NoOpSink)
        }
    }
}
