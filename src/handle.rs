use crate::error::PoolError;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Observable lifecycle of a submitted task.
///
/// `Done`, `Failed` and `Cancelled` are terminal. A handle makes exactly one
/// terminal transition; once terminal, the state never changes again.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TaskState {
    /// Queued, not yet claimed by a worker.
    Pending,
    /// Claimed by a worker and currently executing.
    Running,
    /// Completed successfully; the result is (or was) available.
    Done,
    /// The task panicked while executing.
    Failed,
    /// Cancelled before any worker claimed it.
    Cancelled,
}

impl TaskState {
    /// Returns `true` for `Done`, `Failed` and `Cancelled`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Done | TaskState::Failed | TaskState::Cancelled)
    }
}

struct Inner<T> {
    state: TaskState,
    // Present from the terminal transition until `result()` takes it.
    // `Err` holds `TaskPanicked`; `Cancelled` carries no payload.
    outcome: Option<Result<T, PoolError>>,
}

struct Shared<T> {
    inner: Mutex<Inner<T>>,
    signal: Condvar,
}

/// The handle a submitter holds to observe eventual completion of a task.
///
/// Cloneable; any number of threads may wait on the same handle and all are
/// released when it reaches a terminal state. The executing worker is the
/// only writer of the `Running`/`Done`/`Failed` transitions; `cancel` is the
/// only submitter-side mutation and succeeds only while still `Pending`.
pub struct ResultHandle<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for ResultHandle<T> {
    fn clone(&self) -> Self {
        ResultHandle { shared: self.shared.clone() }
    }
}

impl<T> fmt::Debug for ResultHandle<T> {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("ResultHandle")
            .field("state", &self.state())
            .finish()
    }
}

impl<T> ResultHandle<T> {
    pub(crate) fn new() -> ResultHandle<T> {
        ResultHandle {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: TaskState::Pending,
                    outcome: None,
                }),
                signal: Condvar::new(),
            }),
        }
    }

    /// Returns the current state of the task.
    pub fn state(&self) -> TaskState {
        self.shared.inner.lock().state
    }

    /// Block until the task reaches a terminal state, or until `timeout`
    /// elapses if one is given.
    ///
    /// Returns the state observed when the wait ended; on timeout that state
    /// may still be `Pending` or `Running`.
    pub fn wait(&self, timeout: Option<Duration>) -> TaskState {
        let mut inner = self.shared.inner.lock();

        match timeout {
            None => {
                while !inner.state.is_terminal() {
                    self.shared.signal.wait(&mut inner);
                }
            }
            Some(timeout) => {
                let deadline = Instant::now() + timeout;

                while !inner.state.is_terminal() {
                    if self.shared.signal.wait_until(&mut inner, deadline).timed_out() {
                        break;
                    }
                }
            }
        }

        inner.state
    }

    /// Take the task's outcome without blocking.
    ///
    /// Fails with [`PoolError::NotReady`] while the task is still `Pending`
    /// or `Running`. On `Done` the value is moved out; a second call returns
    /// [`PoolError::ResultTaken`]. On `Failed` the captured panic is returned
    /// (once, then `ResultTaken`); on `Cancelled`, [`PoolError::Cancelled`].
    pub fn result(&self) -> Result<T, PoolError> {
        let mut inner = self.shared.inner.lock();

        match inner.state {
            TaskState::Pending | TaskState::Running => Err(PoolError::NotReady),
            TaskState::Cancelled => Err(PoolError::Cancelled),
            TaskState::Done | TaskState::Failed => {
                inner.outcome.take().unwrap_or(Err(PoolError::ResultTaken))
            }
        }
    }

    /// Request cancellation.
    ///
    /// Succeeds only while the task is still `Pending`; a task already
    /// claimed by a worker runs to completion. Returns `true` if the task
    /// was cancelled by this call.
    pub fn cancel(&self) -> bool {
        let mut inner = self.shared.inner.lock();

        if inner.state != TaskState::Pending {
            return false;
        }

        inner.state = TaskState::Cancelled;
        self.shared.signal.notify_all();
        true
    }

    // == worker-side transitions ==

    /// Claim the task for execution: `Pending` -> `Running`. Returns `false`
    /// if the task was cancelled first, in which case it must not run.
    pub(crate) fn try_start(&self) -> bool {
        let mut inner = self.shared.inner.lock();

        if inner.state != TaskState::Pending {
            return false;
        }

        inner.state = TaskState::Running;
        true
    }

    /// `Running` -> `Done`, waking all waiters.
    pub(crate) fn complete(&self, value: T) {
        let mut inner = self.shared.inner.lock();

        debug_assert_eq!(inner.state, TaskState::Running);
        if inner.state.is_terminal() {
            return;
        }

        inner.state = TaskState::Done;
        inner.outcome = Some(Ok(value));
        self.shared.signal.notify_all();
    }

    /// `Running` -> `Failed`, recording the captured panic message.
    pub(crate) fn fail(&self, message: String) {
        let mut inner = self.shared.inner.lock();

        debug_assert_eq!(inner.state, TaskState::Running);
        if inner.state.is_terminal() {
            return;
        }

        inner.state = TaskState::Failed;
        inner.outcome = Some(Err(PoolError::TaskPanicked(message)));
        self.shared.signal.notify_all();
    }
}
