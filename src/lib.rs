//! Execute tasks on pooled worker threads that retire themselves when idle.
//!
//! A naive thread-pool executor never terminates a worker once spawned, so a
//! long-running process that submits many short bursts of work slowly
//! accumulates permanently idle OS threads, wasting memory and scheduler
//! overhead. This pool gives every worker an idle time-to-live: a worker
//! that waits out the TTL with no work on the queue retires itself and
//! releases its thread, and the pool grows back lazily the next time demand
//! requires it.
//!
//! Submitting a closure returns a [`ResultHandle`], which can be waited on,
//! polled without blocking, or cancelled while the task is still queued.
//! [`ThreadPool::map`] fans a closure out over an iterator and yields the
//! results in input order. Shutdown can either drain the backlog or cancel
//! it wholesale, and can optionally block until every worker has retired.
//!
//! ```
//! use std::time::Duration;
//! use ttl_thread_pool::ThreadPool;
//!
//! let pool = ThreadPool::new(4, Duration::from_millis(100));
//!
//! let handle = pool.submit(|| 6 * 7).unwrap();
//! handle.wait(None);
//! assert_eq!(handle.result(), Ok(42));
//!
//! pool.shutdown(true, false);
//! ```
//!
//! Construction goes through [`Builder`] when the defaults (worker count
//! sized to the machine, 300 second TTL, unbounded queue) do not fit; the
//! [`Executor`] trait is the seam for code that should not depend on the
//! concrete pool type.

#![deny(missing_docs, missing_debug_implementations)]

mod error;
mod executor;
mod handle;
mod queue;
mod state;
mod task;
mod thread_pool;

pub use error::PoolError;
pub use executor::{default_pool, Executor};
pub use handle::{ResultHandle, TaskState};
pub use thread_pool::{Builder, MapResults, ThreadPool};
