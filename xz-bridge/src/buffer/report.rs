//! Sinks that receive native memory usage after each task that ran.

use tracing::debug;

/// Receives the live-byte total of a [`super::TrackedAllocator`].
///
/// Embedders forward the value to whatever resource accounting their runtime
/// keeps, so memory held by undelivered or unreleased chunks is visible to it.
pub trait MemoryReporter: Send + Sync {
    /// Called with the current number of live bytes.
    fn report(&self, live_bytes: usize);
}

/// Blanket implementation allowing closures to act as reporters.
impl<T> MemoryReporter for T
where
    T: Fn(usize) + Send + Sync,
{
    fn report(&self, live_bytes: usize) {
        self(live_bytes);
    }
}

/// Reporter that discards every report.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReporter;

impl MemoryReporter for NoopReporter {
    fn report(&self, _live_bytes: usize) {}
}

/// Reporter that emits each report as a `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl MemoryReporter for TracingReporter {
    fn report(&self, live_bytes: usize) {
        debug!(live_bytes, "native output buffer usage");
    }
}
