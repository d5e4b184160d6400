use thiserror::Error;

/// Errors surfaced by the pool and by [`ResultHandle`](crate::ResultHandle).
///
/// Failures stay local: an error raised by one task is only ever visible
/// through that task's handle and never affects other in-flight tasks. A
/// fault inside a worker's own loop is not represented here at all: it is
/// fatal to that one worker, which retires, and the pool spawns a replacement
/// on the next submission that needs one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The pool has begun shutting down and no longer accepts tasks.
    #[error("pool is shut down, cannot accept new tasks")]
    Shutdown,

    /// The work queue was built with a capacity bound and is full.
    #[error("work queue is at capacity")]
    QueueFull,

    /// The task has not reached a terminal state yet.
    ///
    /// Recoverable: the caller may poll again or block in
    /// [`ResultHandle::wait`](crate::ResultHandle::wait).
    #[error("task has not completed yet")]
    NotReady,

    /// The task panicked while executing. Carries the captured panic
    /// message.
    #[error("task panicked: {0}")]
    TaskPanicked(String),

    /// The task was cancelled before any worker claimed it.
    #[error("task was cancelled before it could run")]
    Cancelled,

    /// The task completed, but its result was already taken by an earlier
    /// call to [`ResultHandle::result`](crate::ResultHandle::result).
    #[error("task result was already taken")]
    ResultTaken,
}
