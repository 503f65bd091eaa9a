//! The object that owns one compression stream across many encode tasks.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::buffer::{OutputBuffer, TrackedAllocator};
use crate::engine::Engine;
use crate::error::{Error, Result};

/// A session shared between its owner and the task currently encoding it.
pub type SharedSession<E> = Arc<Mutex<EncodeSession<E>>>;

/// Lifecycle of an [`EncodeSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepting input and encode submissions.
    Open,
    /// The engine flushed the end of the stream; further finishes are no-ops.
    Finished,
    /// A task failed mid-stream; the engine position is undefined.
    Poisoned,
}

/// Engine state, output allocator and not-yet-delivered output of one stream.
pub struct EncodeSession<E> {
    pub(crate) engine: E,
    pub(crate) allocator: TrackedAllocator,
    pub(crate) pending_output: Vec<OutputBuffer>,
    state: SessionState,
}

impl<E: Engine> EncodeSession<E> {
    /// Creates a session whose output buffers come from the global allocator.
    pub fn new(engine: E) -> Self {
        Self::with_allocator(engine, TrackedAllocator::new())
    }

    /// Creates a session with a caller-provided tracked allocator.
    pub fn with_allocator(engine: E, allocator: TrackedAllocator) -> Self {
        Self {
            engine,
            allocator,
            pending_output: Vec::new(),
            state: SessionState::Open,
        }
    }

    /// Wraps the session so encode tasks can borrow it.
    pub fn into_shared(self) -> SharedSession<E> {
        Arc::new(Mutex::new(self))
    }

    /// Buffers more uncompressed input for the next encode task.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionPoisoned`] after a failed task,
    /// [`Error::SessionFinished`] once the stream ended, or the engine's
    /// rejection of the input.
    pub fn write(&mut self, input: &[u8]) -> Result<()> {
        match self.state {
            SessionState::Poisoned => Err(Error::SessionPoisoned),
            SessionState::Finished => Err(Error::SessionFinished),
            SessionState::Open => Ok(self.engine.feed_input(input)?),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        self.state == SessionState::Finished
    }

    pub fn is_poisoned(&self) -> bool {
        self.state == SessionState::Poisoned
    }

    /// Number of output buffers waiting for the next completed task.
    pub fn pending_chunks(&self) -> usize {
        self.pending_output.len()
    }

    /// Compressed bytes waiting for the next completed task.
    pub fn pending_bytes(&self) -> usize {
        self.pending_output.iter().map(|buffer| buffer.len()).sum()
    }

    pub fn allocator(&self) -> &TrackedAllocator {
        &self.allocator
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Moves every pending buffer out, in production order.
    pub(crate) fn take_pending(&mut self) -> Vec<OutputBuffer> {
        std::mem::take(&mut self.pending_output)
    }

    /// Releases every pending buffer and returns how many were dropped.
    pub(crate) fn discard_pending(&mut self) -> usize {
        let pending = self.take_pending();
        let count = pending.len();
        for buffer in pending {
            self.allocator.release(buffer);
        }
        count
    }

    pub(crate) fn mark_finished(&mut self) {
        if self.state == SessionState::Open {
            self.state = SessionState::Finished;
        }
    }

    pub(crate) fn poison(&mut self) {
        self.state = SessionState::Poisoned;
    }
}

impl<E> std::fmt::Debug for EncodeSession<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodeSession")
            .field("state", &self.state)
            .field("pending_chunks", &self.pending_output.len())
            .field("allocator", &self.allocator)
            .finish_non_exhaustive()
    }
}
