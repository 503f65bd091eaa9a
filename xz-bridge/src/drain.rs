//! Moves engine output into tracked buffers on the session's pending list.

use tracing::trace;

use crate::config::DrainMode;
use crate::engine::{EncodeAction, Engine};
use crate::error::{Error, Result};
use crate::session::{EncodeSession, SessionState};

/// Pulls output blocks for one submission and appends them to the session.
///
/// Each block is copied into a buffer of exactly its size, finalized so that
/// no tail is left available, and appended in production order.
///
/// # Parameters
///
/// * `session` - Session whose engine is drained and whose pending list grows
/// * `action` - What this submission asks of the engine
/// * `mode` - Whether to stop after one block or pull until the engine is empty
///
/// # Returns
///
/// The number of buffers appended by this call.
///
/// # Errors
///
/// - [`Error::SessionPoisoned`] if an earlier task left the session undefined
/// - [`Error::OutOfMemory`] if a buffer could not be allocated; buffers
///   appended earlier in the same call stay on the pending list
/// - [`Error::Engine`] if the engine failed; nothing from the failed pull is
///   appended
pub fn drain<E: Engine>(
    session: &mut EncodeSession<E>,
    action: EncodeAction,
    mode: DrainMode,
) -> Result<usize> {
    match session.state() {
        SessionState::Poisoned => return Err(Error::SessionPoisoned),
        SessionState::Finished => {
            trace!(?action, "stream already finished, nothing to drain");
            return Ok(0);
        }
        SessionState::Open => {}
    }

    let mut appended = 0usize;
    loop {
        let Some(block) = session.engine.produce_next_output(action)? else {
            break;
        };
        if block.is_empty() {
            break;
        }

        let size = block.len();
        let mut buffer = session.allocator.allocate(size)?;
        buffer.as_writable().copy_from_slice(block);
        session.allocator.finalize(&mut buffer, size)?;
        session.pending_output.push(buffer);
        appended += 1;
        trace!(size, appended, "queued output block");

        if mode == DrainMode::SinglePull {
            break;
        }
    }

    if action.is_last() && session.engine.is_finished() {
        session.mark_finished();
    }

    Ok(appended)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::buffer::TrackedAllocator;
    use crate::testing::{block_steps, FailingAllocator, ScriptedEngine, Step};

    use super::*;

    #[test]
    fn process_without_output_appends_nothing() {
        let mut session = EncodeSession::new(ScriptedEngine::new([Step::Idle]));

        let appended = drain(&mut session, EncodeAction::Process, DrainMode::Exhaustive).unwrap();
        assert_eq!(appended, 0);
        assert_eq!(session.pending_chunks(), 0);
        assert_eq!(session.state(), SessionState::Open);
    }

    /// Blocks land on the pending list in order, exactly sized, nothing available.
    #[test]
    fn finish_appends_blocks_in_order() {
        let mut session = EncodeSession::new(ScriptedEngine::with_blocks(&[10, 4096]));

        let appended = drain(&mut session, EncodeAction::Finish, DrainMode::Exhaustive).unwrap();
        assert_eq!(appended, 2);
        assert!(session.is_finished());

        let sizes: Vec<_> = session.pending_output.iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![10, 4096]);
        assert!(session.pending_output.iter().all(|b| b.available() == 0));
        assert!(session.pending_output[0].iter().all(|&b| b == 1));
        assert!(session.pending_output[1].iter().all(|&b| b == 2));
        assert_eq!(session.allocator().live_bytes(), 4106);
    }

    /// One pull per call: a multi-block finish needs several drains.
    #[test]
    fn single_pull_takes_one_block_per_call() {
        let mut session = EncodeSession::new(ScriptedEngine::with_blocks(&[3, 5]));

        assert_eq!(
            drain(&mut session, EncodeAction::Finish, DrainMode::SinglePull).unwrap(),
            1
        );
        assert!(!session.is_finished());
        assert_eq!(
            drain(&mut session, EncodeAction::Finish, DrainMode::SinglePull).unwrap(),
            1
        );
        assert_eq!(
            drain(&mut session, EncodeAction::Finish, DrainMode::SinglePull).unwrap(),
            0
        );
        assert!(session.is_finished());
        assert_eq!(session.pending_chunks(), 2);
    }

    /// Allocation failure keeps the blocks appended before it.
    #[test]
    fn allocation_failure_stops_drain() {
        let backing = Arc::new(FailingAllocator::on_call(2));
        let allocator = TrackedAllocator::with_backing(backing.clone());
        let mut session =
            EncodeSession::with_allocator(ScriptedEngine::with_blocks(&[4, 8, 16]), allocator);

        let err = drain(&mut session, EncodeAction::Finish, DrainMode::Exhaustive).unwrap_err();
        assert!(matches!(err, Error::OutOfMemory { capacity: 8 }));
        assert_eq!(backing.calls(), 2);
        assert_eq!(session.pending_chunks(), 1);
        assert_eq!(session.pending_output[0].len(), 4);
        assert!(!session.is_finished());
    }

    /// Nothing from a failed engine pull reaches the pending list.
    #[test]
    fn engine_failure_appends_nothing_for_failed_pull() {
        let mut script = block_steps(&[6]);
        script.push(Step::Fail);
        let mut session = EncodeSession::new(ScriptedEngine::new(script));

        let err = drain(&mut session, EncodeAction::Finish, DrainMode::Exhaustive).unwrap_err();
        assert!(matches!(err, Error::Engine(_)));
        assert_eq!(session.pending_chunks(), 1);
        assert_eq!(session.pending_bytes(), 6);
    }

    #[test]
    fn finished_session_drains_nothing() {
        let mut session = EncodeSession::new(ScriptedEngine::with_blocks(&[1]));
        drain(&mut session, EncodeAction::Finish, DrainMode::Exhaustive).unwrap();
        let pulls = session.engine().pulls();

        let appended = drain(&mut session, EncodeAction::Finish, DrainMode::Exhaustive).unwrap();
        assert_eq!(appended, 0);
        assert_eq!(session.engine().pulls(), pulls);
    }

    #[test]
    fn poisoned_session_is_rejected() {
        let mut session = EncodeSession::new(ScriptedEngine::with_blocks(&[1]));
        session.poison();

        let err = drain(&mut session, EncodeAction::Process, DrainMode::Exhaustive).unwrap_err();
        assert!(matches!(err, Error::SessionPoisoned));
        assert_eq!(session.engine().pulls(), 0);
    }
}
