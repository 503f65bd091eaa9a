//! # xz-bridge
//!
//! Runs a long-lived streaming compression session without blocking the
//! caller. Each submission drains the engine on a tokio blocking worker,
//! copies every produced block into a tracked output buffer, and hands the
//! accumulated chunks (or the failure) to a completion callback in the order
//! the engine produced them.
//!
//! ```no_run
//! use xz_bridge::{BridgeConfig, EncodeBridge, EncodeSession, XzEngine, XzOptions};
//!
//! # async fn run() -> xz_bridge::Result<()> {
//! let bridge = EncodeBridge::new(BridgeConfig::default())?;
//! let session = EncodeSession::new(XzEngine::new(&XzOptions::default())?).into_shared();
//!
//! session.lock().await.write(b"hello ")?;
//! let mut compressed: Vec<u8> = Vec::new();
//! for chunk in bridge.encode(&session, false).await? {
//!     compressed.extend_from_slice(&chunk);
//! }
//!
//! session.lock().await.write(b"world")?;
//! for chunk in bridge.encode(&session, true).await? {
//!     compressed.extend_from_slice(&chunk);
//! }
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod engine;

mod bridge;
mod config;
mod drain;
mod error;
mod session;
mod task;

#[cfg(test)]
mod testing;

pub use bridge::EncodeBridge;
pub use buffer::{
    Chunk, MemoryReporter, NoopReporter, OutputBuffer, TracingReporter, TrackedAllocator,
};
pub use config::{BridgeConfig, DrainMode};
pub use drain::drain;
pub use engine::{EncodeAction, Engine};
#[cfg(feature = "xz")]
pub use engine::{IntegrityCheck, XzEngine, XzOptions};
pub use error::{EngineError, Error, Result};
pub use session::{EncodeSession, SessionState, SharedSession};
pub use task::{TaskResult, TaskState};
