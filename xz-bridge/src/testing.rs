//! Test doubles shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::buffer::{Allocator, BlockStorage, MemoryReporter, SystemAllocator};
use crate::engine::{EncodeAction, Engine};
use crate::error::{EngineError, Error, Result};

/// One scripted reply of [`ScriptedEngine::produce_next_output`].
#[derive(Debug, Clone)]
pub enum Step {
    /// Hand out this block.
    Block(Vec<u8>),
    /// Report no output for the current submission.
    Idle,
    /// Fail with a backend error.
    Fail,
    /// Panic inside the engine.
    Panic,
}

/// Engine whose output is fixed in advance.
///
/// Every pull pops the next step. Once the script is exhausted the engine has
/// nothing left to produce and a finishing pull ends the stream.
#[derive(Debug, Default)]
pub struct ScriptedEngine {
    script: VecDeque<Step>,
    current: Vec<u8>,
    fed: Vec<u8>,
    pulls: usize,
    finished: bool,
}

impl ScriptedEngine {
    pub fn new(script: impl IntoIterator<Item = Step>) -> Self {
        Self {
            script: script.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Blocks of the given sizes; block `i` is filled with byte `i + 1`.
    pub fn with_blocks(sizes: &[usize]) -> Self {
        Self::new(block_steps(sizes))
    }

    pub fn fed(&self) -> &[u8] {
        &self.fed
    }

    pub fn pulls(&self) -> usize {
        self.pulls
    }
}

/// Steps for blocks of the given sizes, filled like [`ScriptedEngine::with_blocks`].
pub fn block_steps(sizes: &[usize]) -> Vec<Step> {
    sizes
        .iter()
        .enumerate()
        .map(|(index, &size)| Step::Block(vec![(index + 1) as u8; size]))
        .collect()
}

impl Engine for ScriptedEngine {
    fn feed_input(&mut self, input: &[u8]) -> std::result::Result<(), EngineError> {
        if self.finished {
            return Err(EngineError::InputAfterFinish);
        }
        self.fed.extend_from_slice(input);
        Ok(())
    }

    fn produce_next_output(
        &mut self,
        action: EncodeAction,
    ) -> std::result::Result<Option<&[u8]>, EngineError> {
        if self.finished {
            return Ok(None);
        }
        self.pulls += 1;

        match self.script.pop_front() {
            Some(Step::Block(block)) => {
                self.current = block;
                Ok(Some(self.current.as_slice()))
            }
            Some(Step::Idle) => Ok(None),
            Some(Step::Fail) => Err(EngineError::backend(std::io::Error::other(
                "scripted engine failure",
            ))),
            Some(Step::Panic) => panic!("scripted engine panic"),
            None => {
                if action.is_last() {
                    self.finished = true;
                }
                Ok(None)
            }
        }
    }

    fn is_finished(&self) -> bool {
        self.finished
    }
}

/// Allocator that fails on one specific call and delegates otherwise.
#[derive(Debug)]
pub struct FailingAllocator {
    fail_on: usize,
    calls: AtomicUsize,
}

impl FailingAllocator {
    /// Fails the `call`-th request (1-based).
    pub fn on_call(call: usize) -> Self {
        Self {
            fail_on: call,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Allocator for FailingAllocator {
    fn allocate(&self, len: usize) -> Result<BlockStorage> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_on {
            return Err(Error::OutOfMemory { capacity: len });
        }
        SystemAllocator.allocate(len)
    }
}

/// Reporter that remembers every value it was given.
#[derive(Debug, Clone, Default)]
pub struct RecordingReporter {
    reports: Arc<Mutex<Vec<usize>>>,
}

impl RecordingReporter {
    pub fn reports(&self) -> Vec<usize> {
        self.reports.lock().unwrap().clone()
    }
}

impl MemoryReporter for RecordingReporter {
    fn report(&self, live_bytes: usize) {
        self.reports.lock().unwrap().push(live_bytes);
    }
}
