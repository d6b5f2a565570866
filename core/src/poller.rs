//! One-shot readiness poller.
//!
//! Watches an owner until its surface is realized, fires a continuation once,
//! and exits. Only one poller may ever be armed per dispatcher: the "started"
//! flag is set under its own mutex and never reset.

use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread;
use std::time::Duration;

use crate::owner::{OwnerContext, SharedOwner};

#[derive(Debug)]
pub struct ReadinessPoller {
    started: Mutex<bool>,
    interval: Duration,
    thread_name: String,
}

impl ReadinessPoller {
    #[must_use]
    pub fn new(interval: Duration, thread_name: impl Into<String>) -> Self {
        Self {
            started: Mutex::new(false),
            interval,
            thread_name: thread_name.into(),
        }
    }

    /// Start watching `owner`; `on_ready` runs once, on the poller thread,
    /// after the surface is first seen realized.
    ///
    /// Returns `true` only for the call that actually armed the poller. If the
    /// poller thread cannot be spawned the flag stays unset so a later call
    /// can retry.
    pub fn arm_once<F>(&self, owner: &SharedOwner, on_ready: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let mut started = self.started.lock().unwrap_or_else(PoisonError::into_inner);
        if *started {
            return false;
        }

        let weak = Arc::downgrade(owner);
        let interval = self.interval;
        let spawned = thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || poll_until_realized(&weak, interval, on_ready));

        match spawned {
            Ok(_) => {
                *started = true;
                tracing::debug!(
                    interval_ms = interval.as_millis() as u64,
                    "Readiness poller armed"
                );
                true
            }
            Err(e) => {
                tracing::warn!("Failed to spawn readiness poller: {e}");
                false
            }
        }
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        *self.started.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn poll_until_realized<F: FnOnce()>(
    owner: &Weak<dyn OwnerContext>,
    interval: Duration,
    on_ready: F,
) {
    loop {
        let Some(strong) = owner.upgrade() else {
            tracing::trace!("Owner dropped while polling; poller stopping");
            return;
        };
        if strong.is_disposed() {
            tracing::trace!("Owner disposed while polling; poller stopping");
            return;
        }
        if strong.is_surface_realized() {
            drop(strong);
            tracing::debug!("Owner surface realized; poller completing");
            on_ready();
            return;
        }
        match strong.realization() {
            Some(latch) => {
                latch.wait_timeout(interval);
            }
            None => {
                // Do not keep the owner alive while idle.
                drop(strong);
                thread::sleep(interval);
            }
        }
    }
}
