use crate::error::PoolError;
use crate::handle::ResultHandle;
use crate::thread_pool::{Builder, MapResults, ThreadPool};

use std::sync::Arc;

/// The capability set of a task executor: `submit`, `map` and `shutdown`.
///
/// Code written against this trait can be pointed at [`ThreadPool`], or at
/// a conventional, non-retiring pool, without further changes; the pool is
/// substitutable by interface rather than by concrete type. Callers obtain
/// an executor explicitly and pass it where needed; nothing in this crate
/// requires the process-wide [`default_pool`].
pub trait Executor {
    /// Submit a closure for execution. See [`ThreadPool::submit`].
    fn submit<F, R>(&self, f: F) -> Result<ResultHandle<R>, PoolError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static;

    /// Initiate shutdown. See [`ThreadPool::shutdown`].
    fn shutdown(&self, wait: bool, cancel_pending: bool);

    /// Fan `f` out over `items` and iterate results in input order.
    ///
    /// Provided in terms of [`submit`](Executor::submit), preserving the
    /// head-of-line ordering contract of [`ThreadPool::map`].
    fn map<F, I, R>(&self, f: F, items: I) -> Result<MapResults<R>, PoolError>
    where
        F: Fn(I::Item) -> R + Send + Sync + 'static,
        I: IntoIterator,
        I::Item: Send + 'static,
        R: Send + 'static,
    {
        let f = Arc::new(f);
        let mut handles = Vec::new();

        for item in items {
            let f = f.clone();
            handles.push(self.submit(move || f(item))?);
        }

        Ok(MapResults::new(handles))
    }
}

impl Executor for ThreadPool {
    fn submit<F, R>(&self, f: F) -> Result<ResultHandle<R>, PoolError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        ThreadPool::submit(self, f)
    }

    fn shutdown(&self, wait: bool, cancel_pending: bool) {
        ThreadPool::shutdown(self, wait, cancel_pending)
    }

    fn map<F, I, R>(&self, f: F, items: I) -> Result<MapResults<R>, PoolError>
    where
        F: Fn(I::Item) -> R + Send + Sync + 'static,
        I: IntoIterator,
        I::Item: Send + 'static,
        R: Send + 'static,
    {
        ThreadPool::map(self, f, items)
    }
}

lazy_static::lazy_static! {
    static ref DEFAULT_POOL: ThreadPool = Builder::new()
        .name_prefix("ttl-pool-worker-")
        .build();
}

/// A process-wide shared pool with default configuration.
///
/// Purely a convenience for callers that do not want to thread an executor
/// through their call graph. Lazily constructed on first use; lives for the
/// rest of the process (its idle workers still retire on TTL, so an unused
/// default pool holds no threads).
pub fn default_pool() -> &'static ThreadPool {
    &DEFAULT_POOL
}
