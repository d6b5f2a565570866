//! Triggering the one-shot drain of the pending queue on the owner thread.

use std::future;
use std::sync::Arc;

use handoff_types::ThreadToken;

use crate::dispatcher::Registration;
use crate::hooks::Hooks;
use crate::marshal::{invoke_async, invoke_blocking};
use crate::queue::{DrainReport, PendingQueue};

#[derive(Debug, Default)]
pub(crate) struct DrainCoordinator {
    queue: Arc<PendingQueue>,
}

impl DrainCoordinator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn queue(&self) -> &PendingQueue {
        &self.queue
    }

    /// Drain the queue on the main owner's thread unless that already
    /// happened. Blocks until the drain has run.
    pub(crate) fn trigger_if_needed(&self, registration: &Registration, current: ThreadToken) {
        if self.queue.is_drained() {
            return;
        }
        let Some(owner) = registration.main_owner() else {
            return;
        };
        let hooks = registration.hooks();
        if registration.is_owner_thread(current) {
            drain_now(&self.queue, hooks);
            return;
        }

        let queue = Arc::clone(&self.queue);
        let job_hooks = hooks.clone();
        if let Err(e) = invoke_blocking(owner.as_ref(), current, move || {
            drain_now(&queue, &job_hooks);
        }) {
            hooks.report_error(&format!("failed to drain pending actions: {e}"));
        }
    }

    /// Post the drain to the main owner's thread without waiting for it.
    /// Safe to call from async code.
    pub(crate) fn schedule(&self, registration: &Registration, current: ThreadToken) {
        if self.queue.is_drained() {
            return;
        }
        let Some(owner) = registration.main_owner() else {
            return;
        };
        let hooks = registration.hooks();
        if registration.is_owner_thread(current) {
            drain_now(&self.queue, hooks);
            return;
        }

        let queue = Arc::clone(&self.queue);
        let job_hooks = hooks.clone();
        if let Err(e) = owner.post(Box::new(move || drain_now(&queue, &job_hooks))) {
            hooks.report_error(&format!("failed to drain pending actions: {e}"));
        }
    }

    /// Suspending twin of [`Self::trigger_if_needed`].
    pub(crate) async fn trigger_if_needed_async(
        &self,
        registration: &Registration,
        current: ThreadToken,
    ) {
        if self.queue.is_drained() {
            return;
        }
        let Some(owner) = registration.main_owner() else {
            return;
        };
        let hooks = registration.hooks();
        if registration.is_owner_thread(current) {
            drain_now(&self.queue, hooks);
            return;
        }

        let queue = Arc::clone(&self.queue);
        let job_hooks = hooks.clone();
        let drained = invoke_async(owner.as_ref(), current, move || {
            drain_now(&queue, &job_hooks);
            future::ready(())
        })
        .await;
        if let Err(e) = drained {
            hooks.report_error(&format!("failed to drain pending actions: {e}"));
        }
    }
}

fn drain_now(queue: &PendingQueue, hooks: &Hooks) {
    let report = queue.drain_once(|fault| {
        hooks.report_fault(
            &fault,
            &format!(
                "queued action panicked: {}\n{}",
                fault.message(),
                fault.context().describe()
            ),
        );
    });
    if let DrainReport::Drained { ran, failed } = report {
        tracing::debug!(ran, failed, "Pending actions drained");
        hooks.report_trace(&format!("drained {ran} pending action(s), {failed} failed"));
    }
}
