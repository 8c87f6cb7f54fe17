//! Save cycle state and completion signalling.
//!
//! # Responsibility
//! - Name the phases a save cycle moves through.
//! - Give callers a handle to observe or await the durable-write phase.
//! - Carry durable-write failures to callers after `save()` returned.
//!
//! # Invariants
//! - A handle reaches exactly one terminal phase: `Durable` or `Failed`.
//! - A durable write dropped without running resolves as `Failed`, so
//!   waiters never hang.

use crate::context::changes::ChangeSummary;
use crate::error::{StackError, StackResult};
use std::error::Error;
use std::fmt::{Display, Formatter};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::Arc;
use std::time::Duration;

/// Phases of one save cycle.
///
/// `Idle` and `Durable` are the only phases observable at rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SavePhase {
    Idle,
    HasPendingForegroundChanges,
    PushedToParent,
    QueuedForDurableWrite,
    Durable,
    Failed,
}

/// Durable write gave up; the changes are still pending in the writer tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DurableWriteError {
    pub attempts: u32,
    pub message: String,
    /// What the writer tier still holds after the failure.
    pub pending: ChangeSummary,
}

impl DurableWriteError {
    pub(crate) fn new(attempts: u32, cause: &StackError, pending: ChangeSummary) -> Self {
        Self {
            attempts,
            message: cause.to_string(),
            pending,
        }
    }
}

impl Display for DurableWriteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "gave up after {} attempt(s), {} change(s) still pending: {}",
            self.attempts,
            self.pending.total(),
            self.message
        )
    }
}

impl Error for DurableWriteError {}

/// Side channel invoked on the writer queue when a durable write fails.
pub type DurableWriteReporter = Arc<dyn Fn(&DurableWriteError) + Send + Sync>;

#[derive(Debug, Clone)]
enum SaveState {
    Pushed,
    Queued,
    Durable(ChangeSummary),
    Failed(DurableWriteError),
}

#[derive(Debug)]
struct SaveSignal {
    state: Mutex<SaveState>,
    settled: Condvar,
}

impl SaveSignal {
    fn state(&self) -> MutexGuard<'_, SaveState> {
        self.state.lock()
    }

    fn settle(&self, outcome: SaveState) {
        *self.state() = outcome;
        self.settled.notify_all();
    }
}

fn is_settled(state: &SaveState) -> bool {
    matches!(state, SaveState::Durable(_) | SaveState::Failed(_))
}

fn settled_result(state: &SaveState) -> StackResult<ChangeSummary> {
    match state {
        SaveState::Failed(err) => Err(StackError::DurableWrite(err.clone())),
        SaveState::Durable(summary) => Ok(*summary),
        SaveState::Pushed | SaveState::Queued => Err(StackError::WriterUnavailable),
    }
}

/// Observes the durable-write phase of one save.
#[derive(Debug, Clone)]
pub struct SaveHandle {
    signal: Arc<SaveSignal>,
    pushed: ChangeSummary,
}

/// Writer-side half of a `SaveHandle`.
pub(crate) struct SaveCompleter {
    signal: Arc<SaveSignal>,
}

impl SaveHandle {
    pub(crate) fn pushed_to_parent(pushed: ChangeSummary) -> (Self, SaveCompleter) {
        let signal = Arc::new(SaveSignal {
            state: Mutex::new(SaveState::Pushed),
            settled: Condvar::new(),
        });
        let completer = SaveCompleter {
            signal: Arc::clone(&signal),
        };
        (Self { signal, pushed }, completer)
    }

    /// Records that the durable write sits on the writer queue.
    pub(crate) fn mark_queued(&self) {
        let mut state = self.signal.state();
        if matches!(*state, SaveState::Pushed) {
            *state = SaveState::Queued;
        }
    }

    /// Changes pushed into the writer tier by this save.
    pub fn pushed(&self) -> ChangeSummary {
        self.pushed
    }

    pub fn phase(&self) -> SavePhase {
        match &*self.signal.state() {
            SaveState::Pushed => SavePhase::PushedToParent,
            SaveState::Queued => SavePhase::QueuedForDurableWrite,
            SaveState::Durable(_) => SavePhase::Durable,
            SaveState::Failed(_) => SavePhase::Failed,
        }
    }

    /// Blocks until the durable write finished.
    ///
    /// Returns the summary the writer committed, which may include changes
    /// retained from earlier failed writes.
    pub fn wait(&self) -> StackResult<ChangeSummary> {
        let mut state = self.signal.state();
        self.signal
            .settled
            .wait_while(&mut state, |state| !is_settled(state));
        settled_result(&state)
    }

    /// Like `wait`, but returns `None` if the write is still pending after
    /// `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<StackResult<ChangeSummary>> {
        let mut state = self.signal.state();
        self.signal
            .settled
            .wait_while_for(&mut state, |state| !is_settled(state), timeout);
        is_settled(&state).then(|| settled_result(&state))
    }
}

impl SaveCompleter {
    pub(crate) fn finish(self, result: Result<ChangeSummary, DurableWriteError>) {
        let outcome = match result {
            Ok(summary) => SaveState::Durable(summary),
            Err(err) => SaveState::Failed(err),
        };
        self.signal.settle(outcome);
    }
}

impl Drop for SaveCompleter {
    fn drop(&mut self) {
        if is_settled(&self.signal.state()) {
            return;
        }
        self.signal.settle(SaveState::Failed(DurableWriteError {
            attempts: 0,
            message: "writer queue stopped before the durable write ran".to_string(),
            pending: ChangeSummary::default(),
        }));
    }
}

/// Result of `PersistenceStack::save`.
#[derive(Debug, Clone)]
pub enum SaveOutcome {
    /// Nothing was pending; nothing was touched.
    NoChanges,
    /// Changes reached the writer tier and a durable write is enqueued.
    Queued(SaveHandle),
}

impl SaveOutcome {
    pub fn is_no_op(&self) -> bool {
        matches!(self, Self::NoChanges)
    }

    pub fn handle(&self) -> Option<&SaveHandle> {
        match self {
            Self::NoChanges => None,
            Self::Queued(handle) => Some(handle),
        }
    }

    pub fn phase(&self) -> SavePhase {
        self.handle().map_or(SavePhase::Idle, SaveHandle::phase)
    }

    /// Waits for the durable write, if any.
    pub fn wait(&self) -> StackResult<ChangeSummary> {
        self.handle()
            .map_or(Ok(ChangeSummary::default()), SaveHandle::wait)
    }
}

#[cfg(test)]
mod tests {
    use super::{DurableWriteError, SaveHandle, SavePhase};
    use crate::context::changes::ChangeSummary;
    use crate::error::StackError;
    use std::time::Duration;

    fn one_insert() -> ChangeSummary {
        ChangeSummary {
            inserted: 1,
            ..ChangeSummary::default()
        }
    }

    #[test]
    fn handle_moves_through_phases() {
        let (handle, completer) = SaveHandle::pushed_to_parent(one_insert());
        assert_eq!(handle.phase(), SavePhase::PushedToParent);
        handle.mark_queued();
        assert_eq!(handle.phase(), SavePhase::QueuedForDurableWrite);
        assert!(handle.wait_timeout(Duration::from_millis(5)).is_none());

        let waiter = {
            let handle = handle.clone();
            std::thread::spawn(move || handle.wait())
        };
        completer.finish(Ok(one_insert()));

        let summary = waiter
            .join()
            .expect("waiter should not panic")
            .expect("durable write succeeded");
        assert_eq!(summary, one_insert());
        assert_eq!(handle.phase(), SavePhase::Durable);
    }

    #[test]
    fn mark_queued_does_not_undo_completion() {
        let (handle, completer) = SaveHandle::pushed_to_parent(one_insert());
        completer.finish(Ok(one_insert()));
        handle.mark_queued();
        assert_eq!(handle.phase(), SavePhase::Durable);
    }

    #[test]
    fn dropped_completer_fails_waiters() {
        let (handle, completer) = SaveHandle::pushed_to_parent(one_insert());
        drop(completer);
        assert_eq!(handle.phase(), SavePhase::Failed);
        assert!(matches!(handle.wait(), Err(StackError::DurableWrite(_))));
    }

    #[test]
    fn failure_is_reported_to_every_waiter() {
        let (handle, completer) = SaveHandle::pushed_to_parent(one_insert());
        completer.finish(Err(DurableWriteError {
            attempts: 3,
            message: "disk full".to_string(),
            pending: one_insert(),
        }));
        for _ in 0..2 {
            match handle.wait() {
                Err(StackError::DurableWrite(err)) => assert_eq!(err.attempts, 3),
                other => panic!("unexpected result: {other:?}"),
            }
        }
    }
}
