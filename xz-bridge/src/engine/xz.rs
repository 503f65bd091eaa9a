//! [`Engine`] adapter over liblzma's XZ stream encoder.

use std::num::NonZeroUsize;

use xz2::stream::{Action, Check, Status, Stream};

use crate::error::{EngineError, Error, Result};

use super::{EncodeAction, Engine};

const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

/// Flag OR-ed into a preset to select the slower "extreme" variant.
const PRESET_EXTREME: u32 = 0x8000_0000;

/// Integrity check stored in the XZ stream footer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntegrityCheck {
    /// No integrity check.
    None,
    /// CRC32 checksum.
    Crc32,
    /// CRC64 checksum.
    #[default]
    Crc64,
    /// SHA-256 hash.
    Sha256,
}

impl From<IntegrityCheck> for Check {
    fn from(check: IntegrityCheck) -> Self {
        match check {
            IntegrityCheck::None => Check::None,
            IntegrityCheck::Crc32 => Check::Crc32,
            IntegrityCheck::Crc64 => Check::Crc64,
            IntegrityCheck::Sha256 => Check::Sha256,
        }
    }
}

/// Configuration for [`XzEngine`].
#[derive(Debug, Clone)]
pub struct XzOptions {
    level: u32,
    extreme: bool,
    check: IntegrityCheck,
    block_size: NonZeroUsize,
}

impl Default for XzOptions {
    fn default() -> Self {
        Self {
            level: 6,
            extreme: false,
            check: IntegrityCheck::Crc64,
            block_size: NonZeroUsize::new(DEFAULT_BLOCK_SIZE).unwrap_or(NonZeroUsize::MIN),
        }
    }
}

impl XzOptions {
    /// Sets the compression preset (0 to 9, 6 by default).
    #[must_use]
    pub fn with_level(mut self, level: u32) -> Self {
        self.level = level;
        self
    }

    /// Selects the slower extreme variant of the preset.
    #[must_use]
    pub fn with_extreme(mut self, extreme: bool) -> Self {
        self.extreme = extreme;
        self
    }

    /// Sets the integrity check written into the stream.
    #[must_use]
    pub fn with_check(mut self, check: IntegrityCheck) -> Self {
        self.check = check;
        self
    }

    /// Sets the largest output block the engine hands out per pull.
    #[must_use]
    pub fn with_block_size(mut self, block_size: NonZeroUsize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn check(&self) -> IntegrityCheck {
        self.check
    }

    pub fn block_size(&self) -> usize {
        self.block_size.get()
    }

    fn preset(&self) -> Result<u32> {
        if self.level > 9 {
            return Err(Error::InvalidOption(format!(
                "compression level {} is outside 0..=9",
                self.level
            )));
        }

        Ok(if self.extreme {
            self.level | PRESET_EXTREME
        } else {
            self.level
        })
    }
}

/// Streaming XZ encoder that buffers input until the bridge asks for output.
///
/// Once a flush or finish has started, liblzma must see the same action and
/// the same remaining input until it reports the end of that operation. A
/// pull that stops early leaves the operation in progress; later pulls keep
/// driving it whatever they ask for, and input written meanwhile is held back
/// until it completes.
pub struct XzEngine {
    stream: Stream,
    /// Input fed but not yet consumed by liblzma.
    input: Vec<u8>,
    /// Prefix of `input` already consumed.
    consumed: usize,
    /// Input fed while a flush was in progress.
    staged: Vec<u8>,
    /// Flush or finish started but not yet ended by `StreamEnd`.
    in_progress: Option<EncodeAction>,
    /// Scratch space for one output block.
    block: Vec<u8>,
    /// A sync flush completed and no input arrived since.
    flushed: bool,
    finished: bool,
}

impl XzEngine {
    /// Creates an encoder for a single `.xz` stream.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOption`] for a preset outside `0..=9`, or
    /// [`Error::Engine`] if liblzma rejects the configuration.
    pub fn new(options: &XzOptions) -> Result<Self> {
        let stream = Stream::new_easy_encoder(options.preset()?, options.check.into())
            .map_err(EngineError::from)?;

        Ok(Self {
            stream,
            input: Vec::new(),
            consumed: 0,
            staged: Vec::new(),
            in_progress: None,
            block: vec![0; options.block_size()],
            flushed: false,
            finished: false,
        })
    }

    /// Total uncompressed bytes consumed so far.
    pub fn total_in(&self) -> u64 {
        self.stream.total_in()
    }

    /// Total compressed bytes produced so far.
    pub fn total_out(&self) -> u64 {
        self.stream.total_out()
    }

    fn pending_input(&self) -> usize {
        self.input.len() - self.consumed
    }

    fn append_input(&mut self, input: &[u8]) {
        self.input.drain(..self.consumed);
        self.consumed = 0;
        self.input.extend_from_slice(input);
        self.flushed = false;
    }

    fn complete(&mut self, step: EncodeAction) {
        self.in_progress = None;
        match step {
            EncodeAction::Finish => self.finished = true,
            EncodeAction::Flush => {
                self.flushed = true;
                if !self.staged.is_empty() {
                    let staged = std::mem::take(&mut self.staged);
                    self.append_input(&staged);
                }
            }
            EncodeAction::Process => {}
        }
    }
}

impl Engine for XzEngine {
    fn feed_input(&mut self, input: &[u8]) -> std::result::Result<(), EngineError> {
        if self.finished || self.in_progress == Some(EncodeAction::Finish) {
            return Err(EngineError::InputAfterFinish);
        }
        if input.is_empty() {
            return Ok(());
        }

        if self.in_progress.is_some() {
            self.staged.extend_from_slice(input);
        } else {
            self.append_input(input);
        }
        Ok(())
    }

    fn produce_next_output(
        &mut self,
        action: EncodeAction,
    ) -> std::result::Result<Option<&[u8]>, EngineError> {
        if self.finished {
            return Ok(None);
        }

        loop {
            let step = self.in_progress.unwrap_or(action);
            let lzma_action = match step {
                EncodeAction::Process if self.pending_input() == 0 => return Ok(None),
                EncodeAction::Process => Action::Run,
                EncodeAction::Flush if self.flushed => return Ok(None),
                EncodeAction::Flush => Action::SyncFlush,
                EncodeAction::Finish => Action::Finish,
            };

            let before_in = self.stream.total_in();
            let before_out = self.stream.total_out();
            let input = &self.input[self.consumed..];
            let status = self.stream.process(input, &mut self.block, lzma_action)?;
            let used = (self.stream.total_in() - before_in) as usize;
            let written = (self.stream.total_out() - before_out) as usize;

            self.consumed += used;
            if self.consumed == self.input.len() {
                self.input.clear();
                self.consumed = 0;
            }

            // liblzma signals the end of a sync flush and of the whole stream
            // with the same status.
            let ended = matches!(status, Status::StreamEnd);
            if step != EncodeAction::Process {
                if ended {
                    self.complete(step);
                } else {
                    self.in_progress = Some(step);
                }
            }

            if written > 0 {
                return Ok(Some(&self.block[..written]));
            }
            if self.finished {
                return Ok(None);
            }
            if ended {
                // A carried-over flush ended; serve what this pull asked for.
                continue;
            }
            if used == 0 {
                return match step {
                    EncodeAction::Process => Ok(None),
                    EncodeAction::Flush | EncodeAction::Finish => Err(EngineError::Stalled),
                };
            }
        }
    }

    fn is_finished(&self) -> bool {
        self.finished
    }
}

impl std::fmt::Debug for XzEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XzEngine")
            .field("pending_input", &self.pending_input())
            .field("staged", &self.staged.len())
            .field("in_progress", &self.in_progress)
            .field("block_size", &self.block.len())
            .field("flushed", &self.flushed)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}
