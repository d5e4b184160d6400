use crate::error::PoolError;
use crate::task::Task;

use std::fmt;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
pub(crate) use crossbeam_channel::RecvTimeoutError;

/// The ordered, thread-safe hand-off channel between submitters and workers.
///
/// A thin shell over a crossbeam MPMC channel. FIFO relative to the single
/// queue; each task is removed by at most one worker. The timed dequeue is
/// the primitive the whole TTL design rests on: a worker that receives a
/// task has atomically claimed it and never retires on that iteration, while
/// a timeout is the signal that the idle clock ran out.
///
/// The sender lives behind a mutex so the queue can be closed exactly once:
/// closing drops the only sender, which fails later submissions and wakes
/// every worker blocked in `recv_timeout` once the backlog drains.
pub(crate) struct WorkQueue {
    tx: parking_lot::Mutex<Option<Sender<Task>>>,
    rx: Receiver<Task>,
}

impl WorkQueue {
    /// Unbounded by default; a capacity turns `push` into a backpressure
    /// signal instead of an unbounded backlog.
    pub(crate) fn new(capacity: Option<usize>) -> WorkQueue {
        let (tx, rx) = match capacity {
            Some(capacity) => bounded(capacity),
            None => unbounded(),
        };

        WorkQueue {
            tx: parking_lot::Mutex::new(Some(tx)),
            rx,
        }
    }

    /// Enqueue a task. Never blocks: a bounded queue at capacity reports
    /// `QueueFull`, a closed queue reports `Shutdown`.
    pub(crate) fn push(&self, task: Task) -> Result<(), PoolError> {
        let tx = self.tx.lock();

        match tx.as_ref() {
            None => Err(PoolError::Shutdown),
            Some(tx) => match tx.try_send(task) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => Err(PoolError::QueueFull),
                Err(TrySendError::Disconnected(_)) => Err(PoolError::Shutdown),
            },
        }
    }

    /// Timed dequeue: returns the next task, suspends until one arrives, or
    /// reports `Timeout` after `ttl`. `Disconnected` means the queue is
    /// closed and fully drained.
    pub(crate) fn recv_timeout(&self, ttl: Duration) -> Result<Task, RecvTimeoutError> {
        self.rx.recv_timeout(ttl)
    }

    /// Remove and return every task currently in the queue. Used by
    /// cancel-pending shutdown; racing workers may win individual tasks.
    pub(crate) fn drain(&self) -> Vec<Task> {
        let mut drained = Vec::new();

        while let Ok(task) = self.rx.try_recv() {
            drained.push(task);
        }

        drained
    }

    /// Close the queue. Returns `true` if this call performed the close.
    pub(crate) fn close(&self) -> bool {
        self.tx.lock().take().is_some()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.tx.lock().is_none()
    }

    pub(crate) fn len(&self) -> usize {
        self.rx.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl fmt::Debug for WorkQueue {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("WorkQueue")
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::{ResultHandle, TaskState};

    fn tagged_task(tag: u32) -> (Task, ResultHandle<u32>) {
        let handle = ResultHandle::new();
        (Task::new(move || tag, handle.clone()), handle)
    }

    #[test]
    fn dequeue_preserves_submission_order() {
        let queue = WorkQueue::new(None);

        let mut handles = Vec::new();
        for tag in 0..4 {
            let (task, handle) = tagged_task(tag);
            queue.push(task).unwrap();
            handles.push(handle);
        }

        for (tag, handle) in handles.into_iter().enumerate() {
            let task = queue.recv_timeout(Duration::from_millis(10)).unwrap();
            task.run();
            assert_eq!(handle.result(), Ok(tag as u32));
        }
    }

    #[test]
    fn recv_times_out_on_an_empty_queue() {
        let queue = WorkQueue::new(None);

        let err = queue.recv_timeout(Duration::from_millis(20)).unwrap_err();
        assert_eq!(err, RecvTimeoutError::Timeout);
    }

    #[test]
    fn push_fails_once_closed() {
        let queue = WorkQueue::new(None);

        assert!(queue.close());
        assert!(!queue.close());
        assert!(queue.is_closed());

        let (task, _handle) = tagged_task(0);
        assert_eq!(queue.push(task).unwrap_err(), PoolError::Shutdown);
    }

    #[test]
    fn closed_and_drained_queue_disconnects_receivers() {
        let queue = WorkQueue::new(None);
        let (task, handle) = tagged_task(7);
        queue.push(task).unwrap();
        queue.close();

        // The backlog is still delivered after close.
        queue.recv_timeout(Duration::from_millis(10)).unwrap().run();
        assert_eq!(handle.result(), Ok(7));

        let err = queue.recv_timeout(Duration::from_millis(10)).unwrap_err();
        assert_eq!(err, RecvTimeoutError::Disconnected);
    }

    #[test]
    fn drain_empties_the_backlog() {
        let queue = WorkQueue::new(None);
        let handles: Vec<_> = (0..3)
            .map(|tag| {
                let (task, handle) = tagged_task(tag);
                queue.push(task).unwrap();
                handle
            })
            .collect();

        let drained = queue.drain();
        assert_eq!(drained.len(), 3);
        assert!(queue.is_empty());

        for task in drained {
            task.abandon();
        }
        for handle in handles {
            assert_eq!(handle.state(), TaskState::Cancelled);
        }
    }

    #[test]
    fn bounded_queue_signals_backpressure() {
        let queue = WorkQueue::new(Some(1));

        let (first, _h1) = tagged_task(1);
        queue.push(first).unwrap();

        let (second, _h2) = tagged_task(2);
        assert_eq!(queue.push(second).unwrap_err(), PoolError::QueueFull);
    }
}
