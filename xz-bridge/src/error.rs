//! Error types and result handling for background encode tasks.

use thiserror::Error;

/// Result alias using the crate-level [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure reported by a compression engine.
///
/// The bridge never inspects engine error subtypes; every variant ends up as
/// a generic "compression failed" signal for the caller.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Input was fed to an engine that already finished its stream.
    #[error("input supplied after the stream was finished")]
    InputAfterFinish,

    /// The engine neither consumed input nor produced output while a flush
    /// or finish was still pending.
    #[error("engine made no progress while flushing")]
    Stalled,

    /// Unrecoverable failure inside the compression backend.
    #[error("compression backend failed: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl EngineError {
    /// Wraps any backend error value.
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        EngineError::Backend(Box::new(err))
    }
}

#[cfg(feature = "xz")]
impl From<xz2::stream::Error> for EngineError {
    fn from(err: xz2::stream::Error) -> Self {
        EngineError::backend(err)
    }
}

/// Every failure mode an encode task can surface through its callback.
#[derive(Debug, Error)]
pub enum Error {
    /// An output buffer could not be allocated.
    #[error("unable to allocate output buffer of {capacity} bytes")]
    OutOfMemory {
        /// Size in bytes of the buffer that failed to allocate
        capacity: usize,
    },

    /// The compression engine reported an unrecoverable error.
    #[error("compression failed: {0}")]
    Engine(#[from] EngineError),

    /// A buffer was finalized with more bytes than it can hold.
    #[error("cannot mark {used} bytes as used in a buffer of {capacity} bytes")]
    InvalidLength {
        /// Number of bytes the caller declared as used
        used: usize,
        /// Capacity of the buffer
        capacity: usize,
    },

    /// Invalid option supplied by the caller.
    #[error("invalid option: {0}")]
    InvalidOption(String),

    /// A previous task failed and left the engine in an undefined position.
    #[error("session is in an undefined state after a failed encode; create a new session")]
    SessionPoisoned,

    /// Input was written after the stream was finished.
    #[error("session already finished its stream")]
    SessionFinished,

    /// Another encode task is still running against the same session.
    #[error("session already has an encode task in flight")]
    SessionBusy,

    /// No tokio runtime is available to run background work.
    #[error("no tokio runtime available to run encode tasks")]
    NoRuntime,

    /// The background worker panicked or was cancelled before finishing.
    #[error("background encode worker did not complete: {0}")]
    TaskPanicked(String),
}

impl Error {
    /// Returns `true` when the session must be discarded after this error.
    pub fn poisons_session(&self) -> bool {
        matches!(
            self,
            Error::OutOfMemory { .. }
                | Error::Engine(_)
                | Error::InvalidLength { .. }
                | Error::TaskPanicked(_)
        )
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::TaskPanicked(err.to_string())
    }
}
