//! Configuration primitives for the encode bridge.

/// How far one encode task drives the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrainMode {
    /// Pull at most one output block per task.
    ///
    /// A finishing stream may need several submissions before the session
    /// reports itself finished.
    SinglePull,

    /// Keep pulling until the engine has nothing more to give.
    ///
    /// A finishing submission always completes the stream in one task.
    #[default]
    Exhaustive,
}

/// Settings shared by every task a bridge submits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeConfig {
    drain_mode: DrainMode,
}

impl BridgeConfig {
    /// Sets how far each task drains the engine.
    #[must_use]
    pub fn with_drain_mode(mut self, drain_mode: DrainMode) -> Self {
        self.drain_mode = drain_mode;
        self
    }

    pub fn drain_mode(&self) -> DrainMode {
        self.drain_mode
    }
}
