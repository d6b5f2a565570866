//! Dispatch outcomes.
//!
//! A dispatch that cannot run its action does not fail loudly: it reports
//! through the diagnostic hooks and returns an aborted outcome. Keeping the
//! abort reasons as variants means a caller can never mistake an aborted
//! call's placeholder for a real value.

/// Result of handing an action to an owner.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome<T> {
    /// The action ran and produced this value.
    Completed(T),
    /// The action was queued until the owner surface is realized.
    ///
    /// Only fire-and-forget dispatches defer; value-returning ones wait or abort.
    Deferred,
    /// No owner was available: the main owner is not registered and/or the
    /// explicit target was absent.
    AbortedNoOwner,
    /// The owner exists but its surface never became usable (not realized,
    /// disposed, or the configured wait timed out).
    AbortedNotReady,
}

impl<T> DispatchOutcome<T> {
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::AbortedNoOwner | Self::AbortedNotReady)
    }

    /// The produced value, if the action ran.
    #[must_use]
    pub fn completed(self) -> Option<T> {
        match self {
            Self::Completed(value) => Some(value),
            Self::Deferred | Self::AbortedNoOwner | Self::AbortedNotReady => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> DispatchOutcome<U> {
        match self {
            Self::Completed(value) => DispatchOutcome::Completed(f(value)),
            Self::Deferred => DispatchOutcome::Deferred,
            Self::AbortedNoOwner => DispatchOutcome::AbortedNoOwner,
            Self::AbortedNotReady => DispatchOutcome::AbortedNotReady,
        }
    }

    /// Short label for logs.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed(_) => "completed",
            Self::Deferred => "deferred",
            Self::AbortedNoOwner => "aborted: no owner",
            Self::AbortedNotReady => "aborted: not ready",
        }
    }
}

impl<T: Default> DispatchOutcome<T> {
    /// Collapse to the silent-default contract: the action's value, or
    /// `T::default()` when the action did not run.
    #[must_use]
    pub fn value_or_default(self) -> T {
        self.completed().unwrap_or_default()
    }
}
