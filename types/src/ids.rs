use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide counter for thread tokens. Zero is never handed out.
static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT_TOKEN: Cell<Option<ThreadToken>> = const { Cell::new(None) };
}

/// Identifier of a thread, comparable across threads.
///
/// Tokens are assigned lazily the first time a thread asks for its own token
/// and stay stable for the life of that thread. Tokens are never reused within
/// a process, so two live threads never share one.
///
/// A thread spawner can [`reserve`](ThreadToken::reserve) a token up front and
/// have the new thread [`adopt`](ThreadToken::adopt) it, so the token is known
/// before the thread runs.
///
/// `from_raw` exists so tests can fabricate an identity (for example to pretend
/// the caller is already on the owner thread).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadToken(u64);

impl ThreadToken {
    /// Token of the calling thread.
    #[must_use]
    pub fn current() -> Self {
        CURRENT_TOKEN.with(|slot| {
            slot.get().unwrap_or_else(|| {
                let token = Self::reserve();
                slot.set(Some(token));
                token
            })
        })
    }

    /// A fresh token that no thread holds yet.
    #[must_use]
    pub fn reserve() -> Self {
        Self(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }

    /// Bind this token to the calling thread. Returns `false` and changes
    /// nothing if the thread already has a token.
    pub fn adopt(self) -> bool {
        CURRENT_TOKEN.with(|slot| {
            if slot.get().is_some() {
                return false;
            }
            slot.set(Some(self));
            true
        })
    }

    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ThreadToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread#{}", self.0)
    }
}
