//! Running closures on an owner's thread.
//!
//! Toolkits only provide "post this job"; the blocking and async invoke
//! primitives are built here on top of [`OwnerContext::post`]. Panics inside
//! the closure are caught on the owner thread and handed back to the caller
//! as [`DispatchError::ActionPanicked`], so a faulty action never takes the
//! owner's loop down.

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};

use futures_util::FutureExt;
use handoff_types::{DispatchError, ThreadToken, panic_message};
use tokio::sync::oneshot;

use crate::owner::OwnerContext;

/// Run `f` on this thread, converting a panic into an error.
pub(crate) fn run_guarded<T>(f: impl FnOnce() -> T) -> Result<T, DispatchError> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| DispatchError::ActionPanicked {
        message: panic_message(payload.as_ref()),
    })
}

/// Await `fut`, converting a panic into an error.
pub(crate) async fn await_guarded<F: Future>(fut: F) -> Result<F::Output, DispatchError> {
    AssertUnwindSafe(fut)
        .catch_unwind()
        .await
        .map_err(|payload| DispatchError::ActionPanicked {
            message: panic_message(payload.as_ref()),
        })
}

/// Run `f` on the owner thread and block until it finishes.
///
/// Runs inline when `current` already is the owner thread; posting and
/// waiting there would deadlock. Must not be called from inside an async
/// runtime: the wait parks the calling thread.
pub(crate) fn invoke_blocking<T, F>(
    owner: &dyn OwnerContext,
    current: ThreadToken,
    f: F,
) -> Result<T, DispatchError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    if owner.owning_thread() == current {
        return run_guarded(f);
    }

    let (tx, rx) = oneshot::channel();
    owner.post(Box::new(move || {
        let _ = tx.send(run_guarded(f));
    }))?;

    // A dropped job (loop shut down with work pending) drops the sender.
    rx.blocking_recv().map_err(|_| DispatchError::OwnerClosed)?
}

/// Call `f` on the owner thread, then await the future it returns.
///
/// Only the call to `f` is pinned to the owner thread; the returned future
/// is driven by the awaiting task.
pub(crate) async fn invoke_async<T, F, Fut>(
    owner: &dyn OwnerContext,
    current: ThreadToken,
    f: F,
) -> Result<T, DispatchError>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let fut = if owner.owning_thread() == current {
        run_guarded(f)?
    } else {
        let (tx, rx) = oneshot::channel();
        owner.post(Box::new(move || {
            let _ = tx.send(run_guarded(f));
        }))?;
        rx.await.map_err(|_| DispatchError::OwnerClosed)??
    };
    await_guarded(fut).await
}
