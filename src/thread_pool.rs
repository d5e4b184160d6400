use crate::error::PoolError;
use crate::handle::ResultHandle;
use crate::queue::{RecvTimeoutError, WorkQueue};
use crate::state::{AtomicPoolState, Phase, MAX_WORKER_CAPACITY};
use crate::task::Task;

use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering::{Relaxed, SeqCst};
use std::sync::Arc;
use std::time::Duration;
use std::{fmt, thread, vec};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, trace};

/// Idle eviction threshold applied when the builder leaves it unset.
const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Execute tasks on one of possibly several pooled worker threads.
///
/// Unlike a conventional pool, workers here are transient: a worker that
/// stays idle for the configured time-to-live retires itself and releases
/// its OS thread, so long-running processes that submit bursty workloads do
/// not accumulate permanently idle threads. Workers are spawned lazily, one
/// per submission that finds no idle worker, up to `max_workers`.
///
/// The pool is a cheap cloneable handle; clones share the same work queue
/// and worker accounting.
///
/// For more details, see the [library level documentation](./index.html).
pub struct ThreadPool {
    inner: Arc<Inner>,
}

/// Thread pool configuration.
///
/// Provides detailed control over the properties and behavior of the pool.
pub struct Builder {
    config: Config,

    // Capacity bound for the work queue; `None` means unbounded.
    queue_capacity: Option<usize>,
}

// Worker-visible configuration values
struct Config {
    max_workers: usize,
    ttl: Duration,
    // Used to configure a worker thread
    name_prefix: Option<String>,
    stack_size: Option<usize>,
    after_start: Option<Arc<dyn Fn() + Send + Sync>>,
    before_stop: Option<Arc<dyn Fn() + Send + Sync>>,
}

struct Inner {
    // Packed lifecycle phase + live worker count. Spawning CAS-increments
    // the count against a snapshot, retirement decrements it; both are
    // atomic with respect to `submit`'s spawn decision.
    state: AtomicPoolState,

    // Number of workers currently suspended in the timed dequeue. `submit`
    // prefers waking one of these over spawning a thread.
    idle_workers: AtomicUsize,

    queue: WorkQueue,

    // Acquired when waiting for the pool to terminate
    termination_mutex: Mutex<()>,

    // Signaled once the last worker has retired after shutdown
    termination_signal: Condvar,

    // Used to name worker threads
    next_worker_id: AtomicUsize,

    config: Config,
}

/// Tracks state associated with one worker thread.
struct Worker {
    shared: Arc<Inner>,
}

// Decrements the live worker count when the worker exits, no matter how it
// exits. A panic in the worker's own loop or hooks (not in a task) unwinds
// through this guard, so a faulted worker still retires cleanly and never
// corrupts the shared accounting. Disarmed on the TTL path, where the worker
// deregisters itself before its final queue check.
struct RetireGuard {
    shared: Arc<Inner>,
    armed: bool,
}

// ===== impl Builder =====

impl Builder {
    /// Returns a builder with default values.
    ///
    /// Defaults: `max_workers = min(32, cpus + 4)` (suits both CPU-bound and
    /// I/O-bound work without ballooning on many-core machines), a TTL of
    /// 300 seconds, an unbounded queue, and unnamed worker threads.
    pub fn new() -> Builder {
        Builder {
            config: Config {
                max_workers: default_max_workers(),
                ttl: DEFAULT_TTL,
                name_prefix: None,
                stack_size: None,
                after_start: None,
                before_stop: None,
            },
            queue_capacity: None,
        }
    }

    /// Set the maximum number of live workers.
    ///
    /// Caps the number of tasks executing concurrently. Workers are not
    /// pre-started; the pool grows toward this bound only under demand.
    pub fn max_workers(mut self, val: usize) -> Self {
        self.config.max_workers = val;
        self
    }

    /// Set the idle time-to-live.
    ///
    /// The maximum time a worker waits for new work before retiring itself.
    /// The clock restarts every time a worker finishes a dequeue.
    pub fn ttl(mut self, val: Duration) -> Self {
        self.config.ttl = val;
        self
    }

    /// Bound the work queue, making `submit` report backpressure with
    /// [`PoolError::QueueFull`] once `val` tasks are pending.
    pub fn queue_capacity(mut self, val: usize) -> Self {
        self.queue_capacity = Some(val);
        self
    }

    /// Set the name prefix of threads spawned by the pool.
    ///
    /// The prefix is suffixed with a running id. For example, with prefix
    /// `my-pool-`, workers get names like `my-pool-1`.
    pub fn name_prefix<S: Into<String>>(mut self, val: S) -> Self {
        self.config.name_prefix = Some(val.into());
        self
    }

    /// Set the stack size of threads spawned by the pool.
    pub fn stack_size(mut self, val: usize) -> Self {
        self.config.stack_size = Some(val);
        self
    }

    /// Execute `f` on each worker thread right after it starts, before it
    /// attempts its first dequeue.
    ///
    /// Intended for per-thread initialization, bookkeeping and monitoring.
    /// If `f` panics, that worker retires; the pool itself is unaffected.
    pub fn after_start<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.config.after_start = Some(Arc::new(f));
        self
    }

    /// Execute `f` on each worker thread just before it retires.
    pub fn before_stop<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.config.before_stop = Some(Arc::new(f));
        self
    }

    /// Build and return the configured thread pool.
    ///
    /// # Panics
    ///
    /// Panics if `max_workers` is zero or the TTL is a zero duration.
    pub fn build(self) -> ThreadPool {
        assert!(self.config.max_workers >= 1, "at least one worker required");
        assert!(
            self.config.max_workers <= MAX_WORKER_CAPACITY,
            "`max_workers` exceeds representable capacity"
        );
        assert!(!self.config.ttl.is_zero(), "`ttl` must be a positive duration");

        ThreadPool {
            inner: Arc::new(Inner {
                state: AtomicPoolState::new(),
                idle_workers: AtomicUsize::new(0),
                queue: WorkQueue::new(self.queue_capacity),
                termination_mutex: Mutex::new(()),
                termination_signal: Condvar::new(),
                next_worker_id: AtomicUsize::new(1),
                config: self.config,
            }),
        }
    }
}

impl Default for Builder {
    fn default() -> Builder {
        Builder::new()
    }
}

// ===== impl ThreadPool =====

impl ThreadPool {
    /// Create a pool with an unbounded queue, at most `max_workers` live
    /// workers, and the given idle TTL.
    ///
    /// # Panics
    ///
    /// Panics if `max_workers` is zero or `ttl` is a zero duration.
    pub fn new(max_workers: usize, ttl: Duration) -> ThreadPool {
        Builder::new().max_workers(max_workers).ttl(ttl).build()
    }

    /// Submit a closure for execution, returning the handle its outcome is
    /// observed through.
    ///
    /// The task is appended to the FIFO work queue. If no worker is
    /// currently idle and the live worker count is below `max_workers`, one
    /// new worker is spawned to service the queue; otherwise an idle worker
    /// picks the task up when it reaches the queue head.
    ///
    /// # Errors
    ///
    /// [`PoolError::Shutdown`] once shutdown has begun, and
    /// [`PoolError::QueueFull`] when a bounded queue is at capacity.
    pub fn submit<F, R>(&self, f: F) -> Result<ResultHandle<R>, PoolError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let handle = ResultHandle::new();
        self.inner.queue.push(Task::new(f, handle.clone()))?;

        // Waking an already idle worker is cheaper than a thread spawn, so
        // only grow the pool when nobody is waiting on the queue.
        if self.inner.idle_workers.load(SeqCst) == 0 {
            self.inner.spawn_worker();
        }

        Ok(handle)
    }

    /// Apply `f` to every item, fanning out over the pool, and return a lazy
    /// iterator over the results **in input order**.
    ///
    /// All items are submitted eagerly; results are delivered lazily and in
    /// submission order, so a slow early item delays later, already-finished
    /// items (head-of-line ordering). The iterator is finite and not
    /// restartable.
    ///
    /// # Errors
    ///
    /// Fails like [`submit`](ThreadPool::submit) if the fan-out cannot
    /// complete; items submitted before the failure still execute.
    pub fn map<F, I, R>(&self, f: F, items: I) -> Result<MapResults<R>, PoolError>
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

    /// Initiate shutdown.
    ///
    /// The work queue is closed, so any subsequent `submit` fails with
    /// [`PoolError::Shutdown`]. With `cancel_pending`, every task still
    /// sitting in the queue is marked cancelled and removed without
    /// execution; without it, workers finish draining the backlog. Idle
    /// workers wake, observe the shutdown and retire.
    ///
    /// With `wait`, blocks until every worker has retired; otherwise returns
    /// immediately and the pool winds down in the background. Invoking
    /// shutdown again has no additional effect.
    pub fn shutdown(&self, wait: bool, cancel_pending: bool) {
        if self.inner.queue.close() {
            info!(cancel_pending, "pool shutdown initiated");
        }

        if cancel_pending {
            self.inner.state.try_transition_to_halting();

            let drained = self.inner.queue.drain();
            if !drained.is_empty() {
                debug!(count = drained.len(), "cancelling queued tasks");
            }
            for task in drained {
                task.abandon();
            }
        }

        // With no live workers there is nobody left to observe the closed
        // queue and finalize the pool, so do it here.
        if self.inner.state.load().worker_count() == 0 {
            self.inner.finalize();
        }

        if wait {
            self.await_termination();
        }
    }

    /// Block the current thread until the pool has terminated: shutdown has
    /// begun and every worker has retired.
    pub fn await_termination(&self) {
        let mut lock = self.inner.termination_mutex.lock();

        while !self.inner.state.load().is_terminated() {
            self.inner.termination_signal.wait(&mut lock);
        }
    }

    /// Returns `true` if shutdown has begun but some workers have not yet
    /// retired.
    pub fn is_terminating(&self) -> bool {
        self.inner.queue.is_closed() && !self.is_terminated()
    }

    /// Returns `true` once shutdown has completed and every worker retired.
    pub fn is_terminated(&self) -> bool {
        self.inner.state.load().is_terminated()
    }

    /// Returns the current number of live workers.
    ///
    /// Grows under demand up to `max_workers` and shrinks as idle workers
    /// retire on TTL expiry.
    pub fn worker_count(&self) -> usize {
        self.inner.state.load().worker_count()
    }

    /// Returns the current number of queued, unclaimed tasks.
    pub fn queued(&self) -> usize {
        self.inner.queue.len()
    }
}

impl Clone for ThreadPool {
    fn clone(&self) -> Self {
        ThreadPool { inner: self.inner.clone() }
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("ThreadPool")
            .field("workers", &self.worker_count())
            .field("queued", &self.queued())
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

impl fmt::Debug for Builder {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        const SOME: &&str = &"Some(_)";
        const NONE: &&str = &"None";

        fmt.debug_struct("Builder")
            .field("max_workers", &self.config.max_workers)
            .field("ttl", &self.config.ttl)
            .field("queue_capacity", &self.queue_capacity)
            .field("name_prefix", &self.config.name_prefix)
            .field("stack_size", &self.config.stack_size)
            .field("after_start", if self.config.after_start.is_some() { SOME } else { NONE })
            .field("before_stop", if self.config.before_stop.is_some() { SOME } else { NONE })
            .finish()
    }
}

/// Lazy, input-ordered results of a [`ThreadPool::map`] fan-out.
///
/// Yields one `Result` per input item: the closure's return value, or the
/// error recorded on that item's handle (panic or cancellation).
#[derive(Debug)]
pub struct MapResults<R> {
    handles: vec::IntoIter<ResultHandle<R>>,
}

impl<R> MapResults<R> {
    pub(crate) fn new(handles: Vec<ResultHandle<R>>) -> MapResults<R> {
        MapResults { handles: handles.into_iter() }
    }
}

impl<R> Iterator for MapResults<R> {
    type Item = Result<R, PoolError>;

    fn next(&mut self) -> Option<Self::Item> {
        let handle = self.handles.next()?;
        handle.wait(None);
        Some(handle.result())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.handles.size_hint()
    }
}

impl<R> ExactSizeIterator for MapResults<R> {}

// ===== impl Inner =====

impl Inner {
    /// Attempt to register and start one more worker. Gives up without
    /// spawning when shutdown has begun or the pool is at `max_workers`.
    fn spawn_worker(self: &Arc<Inner>) -> bool {
        let mut state = self.state.load();

        loop {
            if state.phase() >= Phase::Halting || self.queue.is_closed() {
                return false;
            }

            if state.worker_count() >= self.config.max_workers {
                return false;
            }

            match self.state.compare_and_inc_worker_count(state) {
                Ok(()) => break,
                Err(actual) => state = actual,
            }
        }

        // Shutdown may have closed the queue between the phase check and
        // the CAS; undo the registration instead of starting a worker that
        // can never receive work.
        if self.queue.is_closed() {
            let prev = self.state.fetch_dec_worker_count();
            if prev.worker_count() == 1 {
                self.finalize();
            }
            return false;
        }

        // The count now includes this worker; the guard inside `run` is
        // responsible for the matching decrement.
        let worker = Worker { shared: self.clone() };
        worker.spawn();

        true
    }

    fn finalize(&self) {
        // The Tidying CAS picks a single finalizer.
        if self.state.try_transition_to_tidying() {
            // No worker is left to execute queue remnants; their handles
            // must still reach a terminal state.
            for task in self.queue.drain() {
                task.abandon();
            }

            self.state.transition_to_terminated();
            info!("pool terminated");

            // Taking the mutex orders this notification after any
            // in-progress `await_termination` check, so no waiter misses it.
            let _lock = self.termination_mutex.lock();
            self.termination_signal.notify_all();
        }
    }

    /// Deregister a worker whose idle TTL elapsed. Returns `false` when a
    /// task raced in ahead of the deregistration and the worker took its
    /// slot back, in which case it must keep looping instead of exiting.
    ///
    /// The decrement happens before the final queue check. A `submit`
    /// landing between the two therefore always observes a vacant slot and
    /// can spawn a replacement; the retiring worker in turn re-checks the
    /// queue after vacating, so a task accepted during its wind-down is
    /// claimed by one side or the other and never stranded.
    fn try_retire(&self) -> bool {
        self.state.fetch_dec_worker_count();
        let mut state = self.state.load();

        loop {
            // Nothing left to do, or shutdown is cancelling the backlog.
            if self.queue.is_empty() || state.phase() >= Phase::Halting {
                break;
            }

            // A task arrived during the wind-down. Re-register and keep
            // running, unless a concurrent submit already spawned a
            // replacement to cover it.
            if state.worker_count() >= self.config.max_workers {
                break;
            }

            match self.state.compare_and_inc_worker_count(state) {
                Ok(()) => return false,
                Err(actual) => state = actual,
            }
        }

        // A fresh load, not the pre-decrement snapshot: a replacement may
        // have spawned into the vacated slot, and it now owns both the
        // backlog and the last-worker-out finalization.
        if self.queue.is_closed() && self.state.load().worker_count() == 0 {
            self.finalize();
        }

        true
    }
}

// ===== impl Worker ====

impl Worker {
    fn spawn(self) {
        let mut b = thread::Builder::new();

        {
            let c = &self.shared.config;

            if let Some(stack_size) = c.stack_size {
                b = b.stack_size(stack_size);
            }

            if let Some(ref name_prefix) = c.name_prefix {
                let i = self.shared.next_worker_id.fetch_add(1, Relaxed);
                b = b.name(format!("{}{}", name_prefix, i));
            }
        }

        b.spawn(move || self.run()).expect("failed to spawn worker thread");
    }

    fn run(self) {
        let mut retire = RetireGuard { shared: self.shared.clone(), armed: true };

        trace!("worker started");

        if let Some(ref hook) = self.shared.config.after_start {
            hook();
        }

        loop {
            if self.shared.state.load().phase() >= Phase::Halting {
                break;
            }

            // Idle until a task arrives or the TTL elapses. The dequeue is
            // the claim: receiving a task here means this worker does not
            // retire this iteration, even if its TTL elapsed in the same
            // instant.
            self.shared.idle_workers.fetch_add(1, SeqCst);
            let received = self.shared.queue.recv_timeout(self.shared.config.ttl);
            self.shared.idle_workers.fetch_sub(1, SeqCst);

            match received {
                Ok(task) => {
                    if self.shared.state.load().phase() >= Phase::Halting {
                        // Cancel-pending shutdown won the race for this
                        // task; it must not execute.
                        task.abandon();
                        break;
                    }

                    task.run();
                }
                Err(RecvTimeoutError::Timeout) => {
                    // Vacate the packed count before the final queue check,
                    // so a submit racing with retirement either spawns into
                    // the freed slot or leaves a task this worker reclaims
                    // its slot for. `before_stop` runs only once the worker
                    // is definitively leaving.
                    if self.shared.try_retire() {
                        trace!(ttl = ?self.shared.config.ttl, "idle ttl elapsed, retiring");
                        retire.disarm();
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    // Queue closed and fully drained: orderly shutdown.
                    trace!("queue closed, retiring");
                    break;
                }
            }
        }

        if let Some(ref hook) = self.shared.config.before_stop {
            hook();
        }
    }
}

impl RetireGuard {
    // The TTL path deregisters through `try_retire`; the guard must not
    // decrement a second time.
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for RetireGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            // A fault in the worker loop (not in a task) is fatal to this
            // worker only; the next submit spawns a replacement if needed.
            error!("worker loop faulted, retiring this worker");
        }

        if !self.armed {
            return;
        }

        let prev = self.shared.state.fetch_dec_worker_count();

        if prev.worker_count() == 1 && self.shared.queue.is_closed() {
            self.shared.finalize();
        }
    }
}

fn default_max_workers() -> usize {
    usize::min(32, num_cpus::get() + 4)
}
