//! Supervised pool of segmentation subprocesses.
//!
//! [`WorkerPool`] spawns one tokio task per worker. Each task owns one child
//! process (see [`worker::run_worker`]) and resolves to a
//! [`WorkerOutcome`](methseg_core::WorkerOutcome). [`PoolCounters`] tracks
//! how many tasks are in each state while the pool runs.

pub mod manager;
pub mod worker;

pub use manager::WorkerPool;
pub use worker::WorkerTask;

use methseg_core::TaskState;
use portable_atomic::{AtomicUsize, Ordering};

/// Live task counts shared by every worker of a pool.
#[derive(Debug, Default)]
pub struct PoolCounters {
    running: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    cancelled: AtomicUsize,
}

/// Point-in-time copy of [`PoolCounters`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct CounterSnapshot {
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl PoolCounters {
    /// Moves one worker from `from` to `to`.
    ///
    /// `Spawned` has no counter of its own, so a worker that fails to start
    /// only increments `failed`.
    pub(crate) fn transition(&self, from: TaskState, to: TaskState) {
        debug_assert!(!from.is_terminal(), "terminal state {from:?} left");
        if let Some(counter) = self.counter(from) {
            counter.fetch_sub(1, Ordering::Relaxed);
        }
        if let Some(counter) = self.counter(to) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn counter(&self, state: TaskState) -> Option<&AtomicUsize> {
        match state {
            TaskState::Spawned => None,
            TaskState::Running => Some(&self.running),
            TaskState::Completed => Some(&self.completed),
            TaskState::Failed => Some(&self.failed),
            TaskState::Cancelled => Some(&self.cancelled),
        }
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            running: self.running.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_follow_state_transitions() {
        let counters = PoolCounters::default();
        for _ in 0..3 {
            counters.transition(TaskState::Spawned, TaskState::Running);
        }
        counters.transition(TaskState::Running, TaskState::Completed);
        counters.transition(TaskState::Running, TaskState::Failed);
        counters.transition(TaskState::Spawned, TaskState::Failed);

        assert_eq!(
            counters.snapshot(),
            CounterSnapshot {
                running: 1,
                completed: 1,
                failed: 2,
                cancelled: 0,
            }
        );
    }

    #[test]
    #[should_panic(expected = "terminal state")]
    #[cfg(debug_assertions)]
    fn leaving_a_terminal_state_is_a_bug() {
        PoolCounters::default().transition(TaskState::Completed, TaskState::Running);
    }
}
