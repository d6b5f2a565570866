//! Optional error/trace sinks supplied at registration.
//!
//! Every report is also emitted as a `tracing` event, so a host that
//! registers no hooks still sees dispatch problems in its logs.

use std::fmt;
use std::sync::Arc;

use handoff_types::ActionFault;

type MessageHook = Arc<dyn Fn(&str) + Send + Sync>;
type FaultHook = Arc<dyn Fn(&ActionFault, &str) + Send + Sync>;

#[derive(Clone, Default)]
pub struct Hooks {
    error: Option<MessageHook>,
    fault: Option<FaultHook>,
    trace: Option<MessageHook>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("error", &self.error.is_some())
            .field("fault", &self.fault.is_some())
            .field("trace", &self.trace.is_some())
            .finish()
    }
}

impl Hooks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_error(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.error = Some(Arc::new(hook));
        self
    }

    /// Receives panics of deferred actions together with a description of the
    /// dispatch that queued them.
    pub fn on_fault(mut self, hook: impl Fn(&ActionFault, &str) + Send + Sync + 'static) -> Self {
        self.fault = Some(Arc::new(hook));
        self
    }

    pub fn on_trace(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.trace = Some(Arc::new(hook));
        self
    }

    pub(crate) fn report_error(&self, message: &str) {
        tracing::warn!("{message}");
        if let Some(hook) = &self.error {
            hook(message);
        }
    }

    pub(crate) fn report_fault(&self, fault: &ActionFault, message: &str) {
        tracing::error!(
            panic = %fault.message(),
            location = %fault.context().location(),
            "{message}"
        );
        if let Some(hook) = &self.fault {
            hook(fault, message);
        }
    }

    pub(crate) fn report_trace(&self, message: &str) {
        tracing::debug!("{message}");
        if let Some(hook) = &self.trace {
            hook(message);
        }
    }
}
