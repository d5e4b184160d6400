use crate::handle::ResultHandle;

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

/// A unit of work owned by the pool: the submitted closure paired with the
/// handle its outcome is reported through.
///
/// Workers consume a task exactly once, through one of two paths: `run`
/// claims the handle and executes the closure, `abandon` marks the handle
/// cancelled without executing. The pool erases the closure's return type
/// here so a single queue can carry tasks of any result type.
pub(crate) struct Task {
    inner: Box<dyn Run + Send>,
}

trait Run {
    fn run(self: Box<Self>);
    fn abandon(self: Box<Self>);
}

struct Job<F, R> {
    f: F,
    handle: ResultHandle<R>,
}

impl<F, R> Run for Job<F, R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    fn run(self: Box<Self>) {
        let Job { f, handle } = *self;

        // A handle cancelled while the task sat in the queue must never
        // execute.
        if !handle.try_start() {
            return;
        }

        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(value) => handle.complete(value),
            Err(payload) => handle.fail(panic_message(payload.as_ref())),
        }
    }

    fn abandon(self: Box<Self>) {
        let _ = self.handle.cancel();
    }
}

impl Task {
    pub(crate) fn new<F, R>(f: F, handle: ResultHandle<R>) -> Task
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        Task {
            inner: Box::new(Job { f, handle }),
        }
    }

    /// Claim the handle and execute the closure, catching any panic and
    /// recording it on the handle. Never unwinds into the worker loop.
    pub(crate) fn run(self) {
        self.inner.run();
    }

    /// Mark the task cancelled without executing it. No-op if the handle
    /// already reached a terminal state.
    pub(crate) fn abandon(self) {
        self.inner.abandon();
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("Task").finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "task panicked with a non-string payload".to_string()
    }
}
