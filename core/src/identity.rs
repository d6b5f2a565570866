//! Who is calling.
//!
//! The dispatcher never asks the OS directly; it asks a [`ThreadIdentity`].
//! Production code uses [`CurrentThread`]. Tests inject a fixed identity to
//! simulate "already on the owner thread" without a real owner.

use handoff_types::ThreadToken;

pub trait ThreadIdentity: Send + Sync {
    fn current(&self) -> ThreadToken;
}

/// Reports the real calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct CurrentThread;

impl ThreadIdentity for CurrentThread {
    fn current(&self) -> ThreadToken {
        ThreadToken::current()
    }
}

/// Always reports the same token, whichever thread asks.
#[derive(Debug, Clone, Copy)]
pub struct FixedThread(pub ThreadToken);

impl ThreadIdentity for FixedThread {
    fn current(&self) -> ThreadToken {
        self.0
    }
}
