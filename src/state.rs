use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering::SeqCst;

/// Packed pool control state.
///
/// A single atomic word carries two conceptual fields:
///
///   worker_count: the number of workers permitted to start and not yet
///                 permitted to stop
///   phase:        where the pool is in its lifecycle
///
/// Packing them means the spawn decision ("is there room for one more
/// worker, and is the pool still running?") is a single compare-exchange, so
/// `worker_count <= max_workers` holds under every interleaving of
/// submissions and retirements.
pub(crate) struct AtomicPoolState {
    word: AtomicUsize,
}

/// A snapshot of the packed word.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub(crate) struct PoolState {
    word: usize,
}

/// Pool lifecycle phase.
///
/// The phase only ever increases:
///
///   Running    Accept new tasks and process queued tasks. A graceful
///              shutdown is signalled by closing the work queue and does not
///              leave this phase until the last worker retires.
///   Halting    Cancel-pending shutdown: don't process queued tasks; workers
///              abandon anything they dequeue and retire.
///   Tidying    Worker count just hit zero after the queue closed; the
///              worker that made that transition finalizes the pool.
///   Terminated Fully shut down; `await_termination` returns.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) enum Phase {
    Running = 0,
    Halting = 1,
    Tidying = 2,
    Terminated = 3,
}

const PHASE_BITS: usize = 2;
const PHASE_MASK: usize = (1 << PHASE_BITS) - 1;

/// Largest representable worker count.
pub(crate) const MAX_WORKER_CAPACITY: usize = (1 << (32 - PHASE_BITS)) - 1;

const ONE_WORKER: usize = 1 << PHASE_BITS;

impl AtomicPoolState {
    pub(crate) fn new() -> AtomicPoolState {
        AtomicPoolState {
            word: AtomicUsize::new(PoolState::of(Phase::Running).word),
        }
    }

    pub(crate) fn load(&self) -> PoolState {
        PoolState { word: self.word.load(SeqCst) }
    }

    fn compare_exchange(&self, expect: PoolState, next: PoolState) -> Result<(), PoolState> {
        self.word
            .compare_exchange(expect.word, next.word, SeqCst, SeqCst)
            .map(|_| ())
            .map_err(|actual| PoolState { word: actual })
    }

    /// Attempt to register one more worker against the snapshot `expect`.
    /// On failure, returns the state actually observed so the caller can
    /// re-evaluate its spawn decision.
    pub(crate) fn compare_and_inc_worker_count(&self, expect: PoolState) -> Result<(), PoolState> {
        debug_assert!(expect.worker_count() < MAX_WORKER_CAPACITY);
        self.compare_exchange(expect, PoolState { word: expect.word + ONE_WORKER })
    }

    /// Unconditionally deregister one worker, returning the state prior to
    /// the decrement.
    pub(crate) fn fetch_dec_worker_count(&self) -> PoolState {
        let prev = self.word.fetch_sub(ONE_WORKER, SeqCst);
        debug_assert!(prev >> PHASE_BITS > 0, "worker count underflow");
        PoolState { word: prev }
    }

    /// Move to `Halting` unless the pool is already there or further along.
    pub(crate) fn try_transition_to_halting(&self) -> bool {
        self.advance_phase(Phase::Halting)
    }

    /// Move to `Tidying`. A successful transition grants the caller the
    /// exclusive right to finalize the pool and transition to `Terminated`.
    pub(crate) fn try_transition_to_tidying(&self) -> bool {
        self.advance_phase(Phase::Tidying)
    }

    /// Complete finalization. Only the thread that won the `Tidying`
    /// transition may call this.
    pub(crate) fn transition_to_terminated(&self) {
        let ok = self.advance_phase(Phase::Terminated);
        debug_assert!(ok, "terminated without passing through tidying");
    }

    fn advance_phase(&self, target: Phase) -> bool {
        let mut state = self.load();

        loop {
            if state.phase() >= target {
                return false;
            }

            match self.compare_exchange(state, state.with_phase(target)) {
                Ok(()) => return true,
                Err(actual) => state = actual,
            }
        }
    }
}

impl PoolState {
    fn of(phase: Phase) -> PoolState {
        PoolState { word: phase as usize }
    }

    fn with_phase(&self, phase: Phase) -> PoolState {
        PoolState { word: (self.word & !PHASE_MASK) | phase as usize }
    }

    pub(crate) fn phase(&self) -> Phase {
        match self.word & PHASE_MASK {
            0 => Phase::Running,
            1 => Phase::Halting,
            2 => Phase::Tidying,
            _ => Phase::Terminated,
        }
    }

    pub(crate) fn worker_count(&self) -> usize {
        self.word >> PHASE_BITS
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.phase() == Phase::Terminated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_count_round_trips_through_the_packed_word() {
        let state = AtomicPoolState::new();
        assert_eq!(state.load().worker_count(), 0);
        assert_eq!(state.load().phase(), Phase::Running);

        for expected in 1..=5 {
            let snapshot = state.load();
            state.compare_and_inc_worker_count(snapshot).unwrap();
            assert_eq!(state.load().worker_count(), expected);
        }

        let prev = state.fetch_dec_worker_count();
        assert_eq!(prev.worker_count(), 5);
        assert_eq!(state.load().worker_count(), 4);
        assert_eq!(state.load().phase(), Phase::Running);
    }

    #[test]
    fn stale_snapshot_fails_the_increment() {
        let state = AtomicPoolState::new();
        let stale = state.load();

        state.compare_and_inc_worker_count(stale).unwrap();

        let err = state.compare_and_inc_worker_count(stale).unwrap_err();
        assert_eq!(err.worker_count(), 1);
    }

    #[test]
    fn phase_only_advances() {
        let state = AtomicPoolState::new();

        assert!(state.try_transition_to_halting());
        assert!(!state.try_transition_to_halting());

        assert!(state.try_transition_to_tidying());
        state.transition_to_terminated();

        assert!(state.load().is_terminated());
        assert!(!state.try_transition_to_halting());
        assert!(!state.try_transition_to_tidying());
    }

    #[test]
    fn phase_survives_count_changes() {
        let state = AtomicPoolState::new();
        let snapshot = state.load();
        state.compare_and_inc_worker_count(snapshot).unwrap();

        assert!(state.try_transition_to_halting());
        assert_eq!(state.load().worker_count(), 1);
        assert_eq!(state.load().phase(), Phase::Halting);

        state.fetch_dec_worker_count();
        assert_eq!(state.load().phase(), Phase::Halting);
        assert_eq!(state.load().worker_count(), 0);
    }
}
