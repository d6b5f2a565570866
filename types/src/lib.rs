//! Core domain types for Handoff.
//!
//! Pure types with no IO and no async: thread identity, dispatch outcomes,
//! fault attribution, and the error enums shared by the other crates.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory
#![allow(clippy::missing_panics_doc)] // Panics are documented in assertions

mod error;
mod fault;
mod ids;
mod outcome;

pub use error::{DispatchError, MarshalError};
pub use fault::{ActionFault, DiagnosticContext, panic_message};
pub use ids::ThreadToken;
pub use outcome::DispatchOutcome;
