use thiserror::Error;

/// The owner refused a posted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MarshalError {
    #[error("owner is no longer accepting work")]
    Closed,
}

/// Failure of a dispatch whose action was supposed to run immediately.
///
/// Configuration and readiness problems are not errors; they surface as
/// aborted [`crate::DispatchOutcome`]s.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("action panicked: {message}")]
    ActionPanicked { message: String },
    #[error("owner event loop closed before the action ran")]
    OwnerClosed,
    /// A deferred action was dropped or panicked before handing back a result.
    /// The panic itself is reported through the fault hook.
    #[error("deferred action was abandoned before producing a result")]
    Abandoned,
}

impl From<MarshalError> for DispatchError {
    fn from(err: MarshalError) -> Self {
        match err {
            MarshalError::Closed => Self::OwnerClosed,
        }
    }
}
