//! Background execution of one encode submission.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn, Span};

use crate::buffer::{Chunk, MemoryReporter};
use crate::config::DrainMode;
use crate::drain::drain;
use crate::engine::{EncodeAction, Engine};
use crate::error::{Error, Result};
use crate::session::EncodeSession;

/// What the completion callback receives.
pub type TaskResult = Result<Vec<Chunk>>;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle of an encode task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Holding its callback, session borrow and submission kind.
    Created,
    /// Draining the engine on a blocking worker.
    Executing,
    /// The drain returned without error.
    Succeeded,
    /// The drain failed, or the task could not borrow its session.
    Failed,
    /// The callback has been invoked.
    Completed,
}

/// One submission against a session, from borrow to callback.
pub(crate) struct EncodeTask {
    id: u64,
    state: TaskState,
    action: EncodeAction,
    mode: DrainMode,
    reporter: Arc<dyn MemoryReporter>,
}

impl EncodeTask {
    pub(crate) fn new(
        action: EncodeAction,
        mode: DrainMode,
        reporter: Arc<dyn MemoryReporter>,
    ) -> Self {
        Self {
            id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
            state: TaskState::Created,
            action,
            mode,
            reporter,
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    fn transition(&mut self, next: TaskState) {
        debug!(task = self.id, from = ?self.state, to = ?next, "encode task transition");
        self.state = next;
    }

    /// Runs the task to completion and invokes `callback` exactly once.
    ///
    /// `session` is the already acquired borrow, or the reason it could not
    /// be acquired. The borrow is released before the callback runs.
    pub(crate) async fn run<E, F>(
        mut self,
        session: Result<OwnedMutexGuard<EncodeSession<E>>>,
        callback: F,
    ) -> TaskState
    where
        E: Engine,
        F: FnOnce(TaskResult) + Send + 'static,
    {
        let result = match session {
            Ok(guard) => self.execute(guard).await,
            Err(err) => {
                self.transition(TaskState::Failed);
                warn!(task = self.id, error = %err, "encode task could not start");
                Err(err)
            }
        };

        callback(result);
        self.transition(TaskState::Completed);
        self.state
    }

    async fn execute<E: Engine>(&mut self, guard: OwnedMutexGuard<EncodeSession<E>>) -> TaskResult {
        self.transition(TaskState::Executing);

        let action = self.action;
        let mode = self.mode;
        // The worker thread does not inherit the task span on its own.
        let span = Span::current();
        let joined = tokio::task::spawn_blocking(move || {
            let mut guard = guard;
            let outcome = span.in_scope(|| {
                panic::catch_unwind(AssertUnwindSafe(|| drain(&mut guard, action, mode)))
                    .unwrap_or_else(|payload| Err(Error::TaskPanicked(panic_message(&*payload))))
            });
            (guard, outcome)
        })
        .await;

        let (mut session, outcome) = match joined {
            Ok(parts) => parts,
            Err(err) => {
                // The worker was cancelled and took the session borrow with it.
                self.transition(TaskState::Failed);
                warn!(task = self.id, error = %err, "encode worker did not complete");
                return Err(err.into());
            }
        };

        match outcome {
            Ok(appended) => {
                self.transition(TaskState::Succeeded);
                let chunks = session.take_pending();
                session.allocator().report_usage(&*self.reporter);
                debug!(
                    task = self.id,
                    appended,
                    chunks = chunks.len(),
                    finished = session.is_finished(),
                    "encode task delivered output"
                );
                Ok(chunks)
            }
            Err(err) => {
                self.transition(TaskState::Failed);
                let discarded = session.discard_pending();
                if err.poisons_session() {
                    session.poison();
                }
                session.allocator().report_usage(&*self.reporter);
                warn!(
                    task = self.id,
                    discarded,
                    poisoned = session.is_poisoned(),
                    error = %err,
                    "encode task failed"
                );
                Err(err)
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "encode worker panicked".to_string()
    }
}
