//! Call-site attribution for deferred work.
//!
//! A queued action runs long after (and on a different thread from) the
//! dispatch that created it. The [`DiagnosticContext`] captured at dispatch
//! time is what lets a failure report point back at the original caller.

use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::fmt::{self, Write};
use std::panic::Location;
use std::thread;

use crate::ThreadToken;

/// Where and on which thread a dispatch was issued.
#[derive(Debug)]
pub struct DiagnosticContext {
    location: &'static Location<'static>,
    thread: ThreadToken,
    thread_name: Option<String>,
    backtrace: Option<Backtrace>,
}

impl DiagnosticContext {
    /// Capture the caller's location (through `#[track_caller]` chains) and,
    /// if requested, a backtrace. `Backtrace::capture` honors `RUST_BACKTRACE`,
    /// so enabling this is free unless backtraces are switched on.
    #[track_caller]
    #[must_use]
    pub fn capture(with_backtrace: bool) -> Self {
        Self {
            location: Location::caller(),
            thread: ThreadToken::current(),
            thread_name: thread::current().name().map(ToString::to_string),
            backtrace: with_backtrace.then(Backtrace::capture),
        }
    }

    #[must_use]
    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }

    #[must_use]
    pub fn thread(&self) -> ThreadToken {
        self.thread
    }

    #[must_use]
    pub fn thread_name(&self) -> Option<&str> {
        self.thread_name.as_deref()
    }

    /// The captured backtrace, only if one was actually resolved.
    #[must_use]
    pub fn backtrace(&self) -> Option<&Backtrace> {
        self.backtrace
            .as_ref()
            .filter(|bt| bt.status() == BacktraceStatus::Captured)
    }

    /// Multi-line description suitable for appending to a report message.
    #[must_use]
    pub fn describe(&self) -> String {
        let mut out = format!("dispatched at {} on {}", self.location, self.thread);
        if let Some(name) = &self.thread_name {
            let _ = write!(out, " ({name})");
        }
        if let Some(bt) = self.backtrace() {
            let _ = write!(out, "\n{bt}");
        }
        out
    }
}

impl fmt::Display for DiagnosticContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// A deferred action that panicked while being drained.
#[derive(Debug)]
pub struct ActionFault {
    message: String,
    context: DiagnosticContext,
}

impl ActionFault {
    #[must_use]
    pub fn new(message: impl Into<String>, context: DiagnosticContext) -> Self {
        Self {
            message: message.into(),
            context,
        }
    }

    pub fn from_panic(payload: &(dyn Any + Send), context: DiagnosticContext) -> Self {
        Self::new(panic_message(payload), context)
    }

    /// The panic message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn context(&self) -> &DiagnosticContext {
        &self.context
    }
}

impl fmt::Display for ActionFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.context.location)
    }
}

/// Best-effort text of a panic payload.
#[must_use]
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
