//! Capability interface over a stateful streaming compressor.

#[cfg(feature = "xz")]
mod xz;

#[cfg(feature = "xz")]
pub use xz::{IntegrityCheck, XzEngine, XzOptions};

use crate::error::EngineError;

/// What a submission asks the engine to do with the input buffered so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncodeAction {
    /// Compress as usual; the engine may keep input buffered internally.
    #[default]
    Process,
    /// Emit everything buffered so far without ending the stream.
    Flush,
    /// No more input follows; drive the stream to its end.
    Finish,
}

impl EncodeAction {
    /// Returns `true` for [`EncodeAction::Finish`].
    pub fn is_last(self) -> bool {
        self == EncodeAction::Finish
    }
}

impl From<bool> for EncodeAction {
    fn from(is_last: bool) -> Self {
        if is_last {
            EncodeAction::Finish
        } else {
            EncodeAction::Process
        }
    }
}

/// A streaming compressor driven one output block at a time.
///
/// The bridge only ever talks to this trait. Implementations own their
/// internal state and scratch space; a block returned by
/// [`Engine::produce_next_output`] is valid until the next call.
pub trait Engine: Send + 'static {
    /// Queues more uncompressed input.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InputAfterFinish`] once the stream has ended.
    fn feed_input(&mut self, input: &[u8]) -> Result<(), EngineError>;

    /// Produces the next block of compressed output, or `None` when nothing
    /// more is available for this `action` right now.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Backend`] on an unrecoverable engine failure.
    fn produce_next_output(
        &mut self,
        action: EncodeAction,
    ) -> Result<Option<&[u8]>, EngineError>;

    /// Returns `true` once the stream has been completely flushed after a
    /// [`EncodeAction::Finish`].
    fn is_finished(&self) -> bool;
}

impl<E: Engine + ?Sized> Engine for Box<E> {
    fn feed_input(&mut self, input: &[u8]) -> Result<(), EngineError> {
        (**self).feed_input(input)
    }

    fn produce_next_output(
        &mut self,
        action: EncodeAction,
    ) -> Result<Option<&[u8]>, EngineError> {
        (**self).produce_next_output(action)
    }

    fn is_finished(&self) -> bool {
        (**self).is_finished()
    }
}
