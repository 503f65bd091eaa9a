//! Entry point that submits encode tasks to a tokio runtime.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug_span, Instrument};

use crate::buffer::{Chunk, MemoryReporter, TracingReporter};
use crate::config::BridgeConfig;
use crate::engine::{EncodeAction, Engine};
use crate::error::{EngineError, Error, Result};
use crate::session::{EncodeSession, SharedSession};
use crate::task::{EncodeTask, TaskResult, TaskState};

/// Runs encode submissions off the caller's thread and reports back.
///
/// Cloning is cheap; clones share the runtime handle and memory reporter.
#[derive(Clone)]
pub struct EncodeBridge {
    runtime: Handle,
    reporter: Arc<dyn MemoryReporter>,
    config: BridgeConfig,
}

impl EncodeBridge {
    /// Creates a bridge on the runtime the caller is running in.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoRuntime`] when called outside a tokio runtime.
    pub fn new(config: BridgeConfig) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| Error::NoRuntime)?;
        Ok(Self::with_handle(runtime, config))
    }

    /// Creates a bridge that spawns onto `runtime`.
    pub fn with_handle(runtime: Handle, config: BridgeConfig) -> Self {
        Self {
            runtime,
            reporter: Arc::new(TracingReporter),
            config,
        }
    }

    /// Replaces the sink that receives memory usage.
    ///
    /// Every task that borrows its session reports once before its callback
    /// runs. A task rejected with [`Error::SessionBusy`] reports nothing.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn MemoryReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Submits one encode step; `is_last` marks the final input of the stream.
    ///
    /// `callback` runs exactly once, on a runtime worker, with either the
    /// chunks produced since the previous completed task (in order) or the
    /// error that ended this one. The returned handle resolves to the task's
    /// final state.
    pub fn submit_encode<E, F>(
        &self,
        session: &SharedSession<E>,
        is_last: bool,
        callback: F,
    ) -> JoinHandle<TaskState>
    where
        E: Engine,
        F: FnOnce(TaskResult) + Send + 'static,
    {
        self.submit(session, EncodeAction::from(is_last), callback)
    }

    /// Like [`EncodeBridge::submit_encode`] with an explicit [`EncodeAction`].
    ///
    /// A session accepts one task at a time; submitting while another task
    /// holds it completes immediately with [`Error::SessionBusy`], without
    /// draining the engine or reporting memory usage.
    pub fn submit<E, F>(
        &self,
        session: &SharedSession<E>,
        action: EncodeAction,
        callback: F,
    ) -> JoinHandle<TaskState>
    where
        E: Engine,
        F: FnOnce(TaskResult) + Send + 'static,
    {
        let borrowed = Arc::clone(session)
            .try_lock_owned()
            .map_err(|_| Error::SessionBusy);
        let task = EncodeTask::new(action, self.config.drain_mode(), Arc::clone(&self.reporter));
        let span = debug_span!("encode_task", id = task.id(), ?action);

        self.runtime
            .spawn(task.run(borrowed, callback).instrument(span))
    }

    /// Submits one encode step and waits for its chunks.
    ///
    /// # Errors
    ///
    /// Returns the error the task failed with.
    pub async fn encode<E: Engine>(
        &self,
        session: &SharedSession<E>,
        is_last: bool,
    ) -> Result<Vec<Chunk>> {
        self.encode_with(session, EncodeAction::from(is_last)).await
    }

    /// Forces the engine to emit everything buffered so far.
    ///
    /// # Errors
    ///
    /// Returns the error the task failed with.
    pub async fn flush<E: Engine>(&self, session: &SharedSession<E>) -> Result<Vec<Chunk>> {
        self.encode_with(session, EncodeAction::Flush).await
    }

    async fn encode_with<E: Engine>(
        &self,
        session: &SharedSession<E>,
        action: EncodeAction,
    ) -> Result<Vec<Chunk>> {
        let (tx, rx) = oneshot::channel();
        let _ = self.submit(session, action, move |result| {
            let _ = tx.send(result);
        });

        rx.await
            .map_err(|_| Error::TaskPanicked("encode task dropped its result".to_string()))?
    }

    /// Compresses `input` as one complete stream on a private session.
    ///
    /// # Errors
    ///
    /// Returns the first error any encode step failed with.
    pub async fn compress<E: Engine>(&self, engine: E, input: &[u8]) -> Result<Vec<u8>> {
        let mut session = EncodeSession::new(engine);
        session.write(input)?;
        let session = session.into_shared();

        let mut output = Vec::new();
        loop {
            let chunks = self.encode(&session, true).await?;
            let produced = !chunks.is_empty();
            for chunk in chunks {
                output.extend_from_slice(&chunk);
            }

            if session.lock().await.is_finished() {
                return Ok(output);
            }
            if !produced {
                return Err(EngineError::Stalled.into());
            }
        }
    }
}

impl std::fmt::Debug for EncodeBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodeBridge")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
