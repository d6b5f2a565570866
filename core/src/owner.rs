//! The owner contract.
//!
//! An owner is whatever toolkit object has thread affinity: a window, a
//! surface, an event loop. The dispatcher only needs four things from it:
//! whether its native surface exists, which thread owns it, whether it has
//! been torn down, and a way to post a job onto its thread.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use handoff_types::{MarshalError, ThreadToken};
use tokio::sync::Notify;

/// A unit of work posted to an owner thread.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Owners are shared between the caller, the dispatcher and the poller.
pub type SharedOwner = Arc<dyn OwnerContext>;

pub trait OwnerContext: Send + Sync + 'static {
    /// Whether the native surface (window handle, etc.) exists yet.
    fn is_surface_realized(&self) -> bool;

    /// The thread permitted to touch this owner directly.
    fn owning_thread(&self) -> ThreadToken;

    /// Enqueue `job` to run on the owning thread. Must not run it inline and
    /// must not wait for it.
    fn post(&self, job: Job) -> Result<(), MarshalError>;

    /// Torn-down owners are never waited on.
    fn is_disposed(&self) -> bool {
        false
    }

    /// Owners that can announce realization expose a latch so waiters wake
    /// immediately instead of on the next poll tick.
    fn realization(&self) -> Option<&RealizationLatch> {
        None
    }
}

/// Set-once realization signal.
///
/// Blocking waiters park on the condition variable; async waiters park on a
/// [`Notify`]. Both still re-check the owner on every wake-up, so a latch that
/// is never set degrades to plain interval polling.
#[derive(Debug, Default)]
pub struct RealizationLatch {
    realized: Mutex<bool>,
    cond: Condvar,
    notify: Notify,
}

impl RealizationLatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the latch was already set.
    pub fn set(&self) -> bool {
        let mut realized = self
            .realized
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *realized {
            return false;
        }
        *realized = true;
        drop(realized);
        self.cond.notify_all();
        self.notify.notify_waiters();
        true
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        *self
            .realized
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Block for at most `timeout`. Returns whether the latch is set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self
            .realized
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = self
            .cond
            .wait_timeout_while(guard, timeout, |realized| !*realized)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }

    /// Suspend for at most `timeout`. Returns whether the latch is set.
    pub async fn wait_timeout_async(&self, timeout: Duration) -> bool {
        // Register interest before checking so a concurrent `set` is not missed.
        let notified = self.notify.notified();
        if self.is_set() {
            return true;
        }
        let _ = tokio::time::timeout(timeout, notified).await;
        self.is_set()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitResult {
    Realized,
    Disposed,
    TimedOut,
}

fn next_step(interval: Duration, deadline: Option<Instant>) -> Option<Duration> {
    match deadline {
        Some(deadline) => {
            let now = Instant::now();
            (now < deadline).then(|| interval.min(deadline - now))
        }
        None => Some(interval),
    }
}

/// Block the calling thread until `owner` is realized.
pub(crate) fn wait_until_realized(
    owner: &dyn OwnerContext,
    interval: Duration,
    timeout: Option<Duration>,
) -> WaitResult {
    let deadline = timeout.map(|t| Instant::now() + t);
    loop {
        if owner.is_surface_realized() {
            return WaitResult::Realized;
        }
        if owner.is_disposed() {
            return WaitResult::Disposed;
        }
        let Some(step) = next_step(interval, deadline) else {
            return WaitResult::TimedOut;
        };
        match owner.realization() {
            Some(latch) => {
                latch.wait_timeout(step);
            }
            None => thread::sleep(step),
        }
    }
}

/// Async twin of [`wait_until_realized`]; suspends instead of blocking.
pub(crate) async fn wait_until_realized_async(
    owner: &dyn OwnerContext,
    interval: Duration,
    timeout: Option<Duration>,
) -> WaitResult {
    let deadline = timeout.map(|t| Instant::now() + t);
    loop {
        if owner.is_surface_realized() {
            return WaitResult::Realized;
        }
        if owner.is_disposed() {
            return WaitResult::Disposed;
        }
        let Some(step) = next_step(interval, deadline) else {
            return WaitResult::TimedOut;
        };
        match owner.realization() {
            Some(latch) => {
                latch.wait_timeout_async(step).await;
            }
            None => tokio::time::sleep(step).await,
        }
    }
}
