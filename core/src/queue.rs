//! Actions waiting for the owner surface.
//!
//! One mutex guards both the items and the "drain finished" flag, so a
//! drain and a concurrent enqueue can never interleave: either the item
//! lands before the drain takes the lock (and runs in that drain), or it
//! arrives after the flag is set and is handed straight back to the caller.
//!
//! Actions run under that mutex, so the read accessors (`len`, `is_drained`)
//! go through atomics instead and never touch it. A queued action can ask
//! how much work is pending without deadlocking its own drain.

use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use handoff_types::{ActionFault, DiagnosticContext};

use crate::owner::Job;

/// A deferred action and the context it was dispatched from.
pub struct QueuedAction {
    job: Job,
    context: DiagnosticContext,
}

impl fmt::Debug for QueuedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedAction")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl QueuedAction {
    pub fn new(job: Job, context: DiagnosticContext) -> Self {
        Self { job, context }
    }

    #[must_use]
    pub fn context(&self) -> &DiagnosticContext {
        &self.context
    }

    /// Consume and run the action. A panic comes back as a fault carrying
    /// the original dispatch context.
    pub fn run(self) -> Result<(), ActionFault> {
        let Self { job, context } = self;
        panic::catch_unwind(AssertUnwindSafe(job))
            .map_err(|payload| ActionFault::from_panic(payload.as_ref(), context))
    }
}

#[derive(Debug)]
pub enum Enqueued {
    /// Stored; `position` is its zero-based place in line.
    Queued { position: usize },
    /// The one-shot drain already happened. The action is returned untouched
    /// so the caller can deliver it directly instead of stranding it.
    AlreadyDrained(QueuedAction),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainReport {
    Drained { ran: usize, failed: usize },
    AlreadyFinished,
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<QueuedAction>,
    drain_finished: bool,
}

/// FIFO of deferred actions with a one-shot drain.
#[derive(Debug, Default)]
pub struct PendingQueue {
    state: Mutex<QueueState>,
    /// Mirror of `drain_finished` for lock-free fast-path checks.
    finished: AtomicBool,
    /// Mirror of `items.len()`, written only while the lock is held.
    pending: AtomicUsize,
}

impl PendingQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn enqueue(&self, action: QueuedAction) -> Enqueued {
        let mut state = self.lock();
        if state.drain_finished {
            return Enqueued::AlreadyDrained(action);
        }
        state.items.push_back(action);
        let len = state.items.len();
        self.pending.store(len, Ordering::Release);
        Enqueued::Queued { position: len - 1 }
    }

    /// Run every queued action in order, once per queue lifetime.
    ///
    /// Actions run while the lock is held; anything enqueued concurrently
    /// waits and then observes the finished flag. Actions must not enqueue
    /// into this queue themselves. Faults are handed to `on_fault` after the
    /// lock is released.
    pub fn drain_once(&self, mut on_fault: impl FnMut(ActionFault)) -> DrainReport {
        let mut state = self.lock();
        if state.drain_finished {
            return DrainReport::AlreadyFinished;
        }

        let mut ran = 0;
        let mut faults = Vec::new();
        while let Some(action) = state.items.pop_front() {
            self.pending.store(state.items.len(), Ordering::Release);
            ran += 1;
            if let Err(fault) = action.run() {
                faults.push(fault);
            }
        }

        state.drain_finished = true;
        self.finished.store(true, Ordering::Release);
        drop(state);

        let failed = faults.len();
        for fault in faults {
            on_fault(fault);
        }
        DrainReport::Drained { ran, failed }
    }

    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
