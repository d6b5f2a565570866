//! The dispatch facade.
//!
//! A [`Dispatcher`] routes actions to the registered main owner, or to a
//! per-call fallback target when no live main owner exists. Actions aimed
//! at an owner whose surface is not realized yet are either waited for or
//! queued, and the queue is drained exactly once, in order, on the owner
//! thread.
//!
//! Every dispatch snapshots the [`Registration`] up front and holds no lock
//! while marshalling, so re-entrant dispatches from the owner thread cannot
//! deadlock against a worker.
//!
//! The blocking methods park the calling thread and must not be called from
//! inside an async runtime; use the `_async` variants there.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use futures_util::FutureExt;
use handoff_config::DispatchConfig;
use handoff_types::{DiagnosticContext, DispatchError, DispatchOutcome, ThreadToken};
use tokio::sync::oneshot;

use crate::drain::DrainCoordinator;
use crate::hooks::Hooks;
use crate::identity::{CurrentThread, ThreadIdentity};
use crate::marshal::{await_guarded, invoke_async, invoke_blocking, run_guarded};
use crate::owner::{Job, SharedOwner, WaitResult, wait_until_realized, wait_until_realized_async};
use crate::poller::ReadinessPoller;
use crate::queue::{Enqueued, QueuedAction};

/// The main owner, its thread, and the diagnostic hooks.
///
/// Hooks may be registered without an owner; dispatches then abort with
/// [`DispatchOutcome::AbortedNoOwner`] and report through them.
#[derive(Clone, Default)]
pub struct Registration {
    owner: Option<SharedOwner>,
    owner_thread: Option<ThreadToken>,
    hooks: Hooks,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("owner", &self.owner.is_some())
            .field("owner_thread", &self.owner_thread)
            .field("hooks", &self.hooks)
            .finish()
    }
}

impl Registration {
    /// The owner thread defaults to `owner.owning_thread()`.
    #[must_use]
    pub fn new(owner: Option<SharedOwner>, hooks: Hooks) -> Self {
        let owner_thread = owner.as_ref().map(|owner| owner.owning_thread());
        Self {
            owner,
            owner_thread,
            hooks,
        }
    }

    /// Override the thread treated as "already on the owner thread".
    #[must_use]
    pub fn with_owner_thread(mut self, thread: ThreadToken) -> Self {
        self.owner_thread = Some(thread);
        self
    }

    #[must_use]
    pub fn main_owner(&self) -> Option<&SharedOwner> {
        self.owner.as_ref()
    }

    #[must_use]
    pub fn owner_thread(&self) -> Option<ThreadToken> {
        self.owner_thread
    }

    #[must_use]
    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    pub(crate) fn is_owner_thread(&self, current: ThreadToken) -> bool {
        self.owner_thread == Some(current)
    }

    /// Registered and not torn down.
    fn live_main(&self) -> Option<&SharedOwner> {
        self.owner.as_ref().filter(|owner| !owner.is_disposed())
    }

    /// A live main owner whose surface is realized.
    fn realized_main(&self) -> Option<&SharedOwner> {
        self.live_main().filter(|owner| owner.is_surface_realized())
    }
}

enum TargetState<'a> {
    Missing,
    NotRealized,
    Realized(&'a SharedOwner),
}

struct Inner {
    config: DispatchConfig,
    identity: Arc<dyn ThreadIdentity>,
    registration: RwLock<Registration>,
    drain: DrainCoordinator,
    poller: ReadinessPoller,
}

impl Inner {
    fn snapshot(&self) -> Registration {
        self.registration
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Cheap to clone; clones share registration, queue and poller.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.inner.config)
            .field("registration", &self.inner.snapshot())
            .field("pending", &self.pending_len())
            .field("drained", &self.is_drained())
            .finish_non_exhaustive()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DispatchConfig::default())
    }
}

impl Dispatcher {
    #[must_use]
    pub fn new(config: DispatchConfig) -> Self {
        Self::with_identity(config, CurrentThread)
    }

    /// Use `identity` instead of the real calling thread to decide whether a
    /// dispatch is already on the owner thread.
    #[must_use]
    pub fn with_identity(config: DispatchConfig, identity: impl ThreadIdentity + 'static) -> Self {
        let poller = ReadinessPoller::new(config.poll_interval(), config.poller_thread_name());
        Self {
            inner: Arc::new(Inner {
                config,
                identity: Arc::new(identity),
                registration: RwLock::new(Registration::default()),
                drain: DrainCoordinator::new(),
                poller,
            }),
        }
    }

    /// Register the main owner and hooks, replacing any earlier registration.
    ///
    /// Must not race with in-flight dispatches; those keep the registration
    /// they started with.
    pub fn init(&self, registration: Registration) {
        tracing::debug!(
            owner = registration.owner.is_some(),
            owner_thread = ?registration.owner_thread,
            "Dispatcher initialized"
        );
        *self
            .inner
            .registration
            .write()
            .unwrap_or_else(PoisonError::into_inner) = registration;
    }

    #[must_use]
    pub fn config(&self) -> &DispatchConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn registration(&self) -> Registration {
        self.inner.snapshot()
    }

    /// Actions waiting for the one-shot drain.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.inner.drain.queue().len()
    }

    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.inner.drain.queue().is_drained()
    }

    #[must_use]
    pub fn is_poller_armed(&self) -> bool {
        self.inner.poller.is_armed()
    }

    #[track_caller]
    fn capture(&self) -> DiagnosticContext {
        DiagnosticContext::capture(self.inner.config.capture_backtraces())
    }

    /// Run `action` on the main owner thread and wait for it.
    ///
    /// Blocks until the main surface is realized if it is not yet.
    #[track_caller]
    pub fn run_on_main<F>(&self, action: F) -> Result<DispatchOutcome<()>, DispatchError>
    where
        F: FnOnce() + Send + 'static,
    {
        let context = self.capture();
        let registration = self.inner.snapshot();
        let current = self.inner.identity.current();
        self.main_blocking("run_on_main", &registration, current, &context, action)
    }

    /// Run `action` on the main owner thread and return its value.
    #[track_caller]
    pub fn call_on_main<T, F>(&self, action: F) -> Result<DispatchOutcome<T>, DispatchError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let context = self.capture();
        let registration = self.inner.snapshot();
        let current = self.inner.identity.current();
        self.main_blocking("call_on_main", &registration, current, &context, action)
    }

    /// Call `action` on the main owner thread and await the future it
    /// returns.
    ///
    /// On the owner thread the action is called before this returns, so it
    /// never runs on whichever thread later polls the future.
    #[track_caller]
    pub fn call_on_main_async<T, F, Fut>(
        &self,
        action: F,
    ) -> impl Future<Output = Result<DispatchOutcome<T>, DispatchError>>
    + Send
    + 'static
    + use<T, F, Fut>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let context = self.capture();
        let registration = self.inner.snapshot();
        let current = self.inner.identity.current();
        if registration.is_owner_thread(current) {
            return Self::inline_async(action).left_future();
        }

        let this = self.clone();
        async move {
            this.main_async(
                "call_on_main_async",
                &registration,
                current,
                &context,
                action,
            )
            .await
        }
        .right_future()
    }

    /// Run `action` on the main owner if one is live, otherwise on `target`.
    ///
    /// A live main owner without a realized surface queues the action, as
    /// does a missing main owner with an unrealized `target`. Queued actions
    /// run on the main owner once its surface is realized; the outcome is
    /// then [`DispatchOutcome::Deferred`].
    #[track_caller]
    pub fn run_on_target<F>(
        &self,
        target: Option<&SharedOwner>,
        action: F,
    ) -> Result<DispatchOutcome<()>, DispatchError>
    where
        F: FnOnce() + Send + 'static,
    {
        const OP: &str = "run_on_target";
        let context = self.capture();
        let registration = self.inner.snapshot();
        let current = self.inner.identity.current();
        if registration.is_owner_thread(current) {
            return run_guarded(action).map(DispatchOutcome::Completed);
        }
        if let Some(main) = registration.live_main() {
            if main.is_surface_realized() {
                return self.main_blocking(OP, &registration, current, &context, action);
            }
            registration.hooks().report_trace(&format!(
                "{OP}: MainForm has no realized surface\n{}",
                context.describe()
            ));
            self.defer(OP, &registration, current, Box::new(action), context);
            return Ok(DispatchOutcome::Deferred);
        }

        match Self::check_target(OP, &registration, target, &context) {
            TargetState::Missing => Ok(DispatchOutcome::AbortedNoOwner),
            TargetState::NotRealized => {
                self.defer(OP, &registration, current, Box::new(action), context);
                Ok(DispatchOutcome::Deferred)
            }
            TargetState::Realized(target) => {
                invoke_blocking(target.as_ref(), current, action).map(DispatchOutcome::Completed)
            }
        }
    }

    /// Value-returning [`Self::run_on_target`]. The main owner is only used
    /// once its surface is realized. A target without a realized surface
    /// aborts with [`DispatchOutcome::AbortedNotReady`]; nothing is queued.
    #[track_caller]
    pub fn call_on_target<T, F>(
        &self,
        target: Option<&SharedOwner>,
        action: F,
    ) -> Result<DispatchOutcome<T>, DispatchError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        const OP: &str = "call_on_target";
        let context = self.capture();
        let registration = self.inner.snapshot();
        let current = self.inner.identity.current();
        if registration.is_owner_thread(current) {
            return run_guarded(action).map(DispatchOutcome::Completed);
        }
        if registration.realized_main().is_some() {
            return self.main_blocking(OP, &registration, current, &context, action);
        }

        match Self::check_target(OP, &registration, target, &context) {
            TargetState::Missing => Ok(DispatchOutcome::AbortedNoOwner),
            TargetState::NotRealized => Ok(DispatchOutcome::AbortedNotReady),
            TargetState::Realized(target) => {
                invoke_blocking(target.as_ref(), current, action).map(DispatchOutcome::Completed)
            }
        }
    }

    /// Async [`Self::run_on_target`]. A live main owner is always used, and
    /// the future waits for its surface like [`Self::call_on_main_async`].
    /// Without one, a target lacking a realized surface queues the action
    /// and the future resolves once the drain has called it and its future
    /// finished.
    #[track_caller]
    pub fn call_on_target_async<T, F, Fut>(
        &self,
        target: Option<&SharedOwner>,
        action: F,
    ) -> impl Future<Output = Result<DispatchOutcome<T>, DispatchError>>
    + Send
    + 'static
    + use<T, F, Fut>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        const OP: &str = "call_on_target_async";
        let context = self.capture();
        let registration = self.inner.snapshot();
        let current = self.inner.identity.current();
        if registration.is_owner_thread(current) {
            return Self::inline_async(action).left_future();
        }

        let this = self.clone();
        let target = target.cloned();
        async move {
            if registration.live_main().is_some() {
                return this
                    .main_async(OP, &registration, current, &context, action)
                    .await;
            }

            match Self::check_target(OP, &registration, target.as_ref(), &context) {
                TargetState::Missing => Ok(DispatchOutcome::AbortedNoOwner),
                TargetState::NotRealized => {
                    let (tx, rx) = oneshot::channel();
                    let job: Job = Box::new(move || {
                        let _ = tx.send(action());
                    });
                    this.defer(OP, &registration, current, job, context);
                    let fut = rx.await.map_err(|_| DispatchError::Abandoned)?;
                    await_guarded(fut).await.map(DispatchOutcome::Completed)
                }
                TargetState::Realized(target) => invoke_async(target.as_ref(), current, action)
                    .await
                    .map(DispatchOutcome::Completed),
            }
        }
        .right_future()
    }

    fn inline_async<T, F, Fut>(
        action: F,
    ) -> impl Future<Output = Result<DispatchOutcome<T>, DispatchError>>
    + Send
    + 'static
    + use<T, F, Fut>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let started = run_guarded(action);
        async move { await_guarded(started?).await.map(DispatchOutcome::Completed) }
    }

    fn main_blocking<T, F>(
        &self,
        op: &str,
        registration: &Registration,
        current: ThreadToken,
        context: &DiagnosticContext,
        action: F,
    ) -> Result<DispatchOutcome<T>, DispatchError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if registration.is_owner_thread(current) {
            return run_guarded(action).map(DispatchOutcome::Completed);
        }
        let Some(owner) = Self::main_or_report(op, registration, context) else {
            return Ok(DispatchOutcome::AbortedNoOwner);
        };

        if !owner.is_surface_realized() {
            let config = &self.inner.config;
            let waited = wait_until_realized(
                owner.as_ref(),
                config.poll_interval(),
                config.realize_timeout(),
            );
            if !self.accept_wait(op, registration, waited) {
                return Ok(DispatchOutcome::AbortedNotReady);
            }
        }

        self.inner.drain.trigger_if_needed(registration, current);
        invoke_blocking(owner.as_ref(), current, action).map(DispatchOutcome::Completed)
    }

    async fn main_async<T, F, Fut>(
        &self,
        op: &str,
        registration: &Registration,
        current: ThreadToken,
        context: &DiagnosticContext,
        action: F,
    ) -> Result<DispatchOutcome<T>, DispatchError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let Some(owner) = Self::main_or_report(op, registration, context) else {
            return Ok(DispatchOutcome::AbortedNoOwner);
        };

        if !owner.is_surface_realized() {
            let config = &self.inner.config;
            let waited = wait_until_realized_async(
                owner.as_ref(),
                config.poll_interval(),
                config.realize_timeout(),
            )
            .await;
            if !self.accept_wait(op, registration, waited) {
                return Ok(DispatchOutcome::AbortedNotReady);
            }
        }

        self.inner
            .drain
            .trigger_if_needed_async(registration, current)
            .await;
        invoke_async(owner.as_ref(), current, action)
            .await
            .map(DispatchOutcome::Completed)
    }

    /// The registered main owner, reporting its absence or missing surface.
    fn main_or_report<'a>(
        op: &str,
        registration: &'a Registration,
        context: &DiagnosticContext,
    ) -> Option<&'a SharedOwner> {
        let hooks = registration.hooks();
        let Some(owner) = registration.main_owner() else {
            hooks.report_error(&format!("{op}: MainForm is null\n{}", context.describe()));
            return None;
        };
        if !owner.is_surface_realized() {
            hooks.report_error(&format!(
                "{op}: MainForm has no realized surface\n{}",
                context.describe()
            ));
        }
        Some(owner)
    }

    fn accept_wait(&self, op: &str, registration: &Registration, waited: WaitResult) -> bool {
        match waited {
            WaitResult::Realized => true,
            WaitResult::Disposed => {
                registration.hooks().report_error(&format!(
                    "{op}: MainForm was disposed before its surface was realized"
                ));
                false
            }
            WaitResult::TimedOut => {
                let timeout = self.inner.config.realize_timeout().unwrap_or_default();
                registration.hooks().report_error(&format!(
                    "{op}: MainForm surface not realized within {}ms",
                    timeout.as_millis()
                ));
                false
            }
        }
    }

    fn check_target<'a>(
        op: &str,
        registration: &Registration,
        target: Option<&'a SharedOwner>,
        context: &DiagnosticContext,
    ) -> TargetState<'a> {
        let hooks = registration.hooks();
        let Some(target) = target else {
            hooks.report_error(&format!("{op}: target is null\n{}", context.describe()));
            return TargetState::Missing;
        };
        if target.is_surface_realized() {
            return TargetState::Realized(target);
        }
        hooks.report_error(&format!(
            "{op}: target has no realized surface\n{}",
            context.describe()
        ));
        TargetState::NotRealized
    }

    /// Queue `job` for the one-shot drain and make sure a drain will happen.
    ///
    /// The poller is only armed when a main owner is registered; without one
    /// the action waits until a later dispatch triggers the drain.
    fn defer(
        &self,
        op: &str,
        registration: &Registration,
        current: ThreadToken,
        job: Job,
        context: DiagnosticContext,
    ) {
        match self
            .inner
            .drain
            .queue()
            .enqueue(QueuedAction::new(job, context))
        {
            Enqueued::Queued { position } => {
                tracing::debug!(op, position, "Action deferred until surface is realized");
                registration
                    .hooks()
                    .report_trace(&format!("{op}: deferred at queue position {position}"));
            }
            Enqueued::AlreadyDrained(action) => {
                Self::post_late(op, registration, action);
                return;
            }
        }

        let Some(main) = registration.main_owner() else {
            return;
        };
        if main.is_surface_realized() {
            // Realized between the dispatch check and the enqueue.
            self.inner.drain.schedule(registration, current);
            return;
        }

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        self.inner.poller.arm_once(main, move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let registration = inner.snapshot();
            inner
                .drain
                .trigger_if_needed(&registration, ThreadToken::current());
        });
    }

    /// Deliver an action that missed the drain straight to the main owner.
    fn post_late(op: &str, registration: &Registration, action: QueuedAction) {
        let hooks = registration.hooks();
        let Some(main) = registration.main_owner() else {
            hooks.report_error(&format!(
                "{op}: pending actions already drained and MainForm is null; action dropped\n{}",
                action.context().describe()
            ));
            return;
        };

        let job_hooks = hooks.clone();
        let posted = main.post(Box::new(move || {
            if let Err(fault) = action.run() {
                job_hooks.report_fault(
                    &fault,
                    &format!(
                        "queued action panicked: {}\n{}",
                        fault.message(),
                        fault.context().describe()
                    ),
                );
            }
        }));
        if let Err(e) = posted {
            hooks.report_error(&format!("{op}: {e}; action dropped"));
        }
    }
}
