//! Core dispatch logic for Handoff.
//!
//! Background work hands actions to an owner thread (the thread that owns a
//! window or similar surface). Actions run there in order, even when the
//! owner's surface does not exist yet at call time.
//!
//! ```text
//! Dispatcher ─┬─ same thread? ────────────────► run inline
//!             ├─ main owner ── realized? ─────► drain, then marshal
//!             │                └─ not yet ────► wait, drain, marshal
//!             └─ fallback target ── realized? ► marshal onto target
//!                                 └─ not yet ─► PendingQueue + ReadinessPoller
//!                                                 └─► one-shot drain on main
//! ```
//!
//! Owners implement [`OwnerContext`]; [`EventLoopOwner`] is a ready-made one
//! that pumps jobs on a dedicated thread.

mod dispatcher;
mod drain;
mod event_loop;
mod hooks;
mod identity;
mod marshal;
mod owner;
mod poller;
mod queue;

use std::sync::OnceLock;

pub use dispatcher::{Dispatcher, Registration};
pub use event_loop::{EventLoopOwner, EventPump};
pub use handoff_config::DispatchConfig;
pub use handoff_types::{
    ActionFault, DiagnosticContext, DispatchError, DispatchOutcome, MarshalError, ThreadToken,
};
pub use hooks::Hooks;
pub use identity::{CurrentThread, FixedThread, ThreadIdentity};
pub use owner::{Job, OwnerContext, RealizationLatch, SharedOwner};
pub use poller::ReadinessPoller;
pub use queue::{DrainReport, Enqueued, PendingQueue, QueuedAction};

/// The process-wide dispatcher, configured from `~/.handoff/config.toml` and
/// the environment on first use.
pub fn global() -> &'static Dispatcher {
    static GLOBAL: OnceLock<Dispatcher> = OnceLock::new();
    GLOBAL.get_or_init(|| Dispatcher::new(DispatchConfig::load()))
}
