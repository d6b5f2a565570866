//! A minimal owner: one thread pumping posted jobs in FIFO order.
//!
//! Stands in for a windowing toolkit. The surface starts unrealized; the
//! host calls [`EventLoopOwner::realize`] once its "window" exists and
//! [`EventLoopOwner::dispose`] to tear it down.

use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use handoff_types::{MarshalError, ThreadToken, panic_message};
use tokio::sync::mpsc;

use crate::owner::{Job, OwnerContext, RealizationLatch};

pub struct EventLoopOwner {
    name: String,
    thread: ThreadToken,
    sender: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    join: Mutex<Option<JoinHandle<()>>>,
    realized: AtomicBool,
    disposed: AtomicBool,
    latch: RealizationLatch,
    posted: AtomicUsize,
}

impl fmt::Debug for EventLoopOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoopOwner")
            .field("name", &self.name)
            .field("thread", &self.thread)
            .field("realized", &self.realized.load(Ordering::Relaxed))
            .field("disposed", &self.disposed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// The receiving half of an owner bound to the current thread.
#[derive(Debug)]
pub struct EventPump {
    name: String,
    receiver: mpsc::UnboundedReceiver<Job>,
}

impl EventPump {
    /// Run jobs until the owner is disposed or dropped. Jobs already posted
    /// when that happens still run.
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context.
    pub fn run(mut self) {
        tracing::debug!(owner = %self.name, "Event loop started");
        while let Some(job) = self.receiver.blocking_recv() {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
                tracing::error!(
                    owner = %self.name,
                    panic = %panic_message(payload.as_ref()),
                    "Job panicked on event loop"
                );
            }
        }
        tracing::debug!(owner = %self.name, "Event loop stopped");
    }
}

impl EventLoopOwner {
    /// Make the calling thread the owner thread. The caller must eventually
    /// call [`EventPump::run`] on this same thread.
    #[must_use]
    pub fn bind_current(name: impl Into<String>) -> (Arc<Self>, EventPump) {
        Self::with_thread(name.into(), ThreadToken::current())
    }

    /// Start a dedicated owner thread named `name`.
    pub fn spawn(name: impl Into<String>) -> io::Result<Arc<Self>> {
        let name = name.into();
        let token = ThreadToken::reserve();
        let (owner, pump) = Self::with_thread(name.clone(), token);
        let join = thread::Builder::new().name(name).spawn(move || {
            if token.adopt() {
                pump.run();
            } else {
                tracing::error!(owner = %pump.name, "Loop thread already had a token");
            }
        })?;
        *owner.join.lock().unwrap_or_else(PoisonError::into_inner) = Some(join);
        Ok(owner)
    }

    fn with_thread(name: String, thread: ThreadToken) -> (Arc<Self>, EventPump) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let owner = Arc::new(Self {
            name: name.clone(),
            thread,
            sender: Mutex::new(Some(sender)),
            join: Mutex::new(None),
            realized: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            latch: RealizationLatch::new(),
            posted: AtomicUsize::new(0),
        });
        (owner, EventPump { name, receiver })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mark the surface as realized. Only the first call has an effect.
    pub fn realize(&self) {
        if !self.realized.swap(true, Ordering::AcqRel) {
            tracing::debug!(owner = %self.name, "Surface realized");
        }
        self.latch.set();
    }

    /// Tear down: stop accepting jobs and let the loop exit once it has run
    /// what is already queued.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(sender);
    }

    /// Dispose and wait for a spawned loop thread to finish. A no-op for
    /// owners created with [`EventLoopOwner::bind_current`] or when called
    /// from the loop thread itself.
    pub fn shutdown(&self) {
        self.dispose();
        if ThreadToken::current() == self.thread {
            return;
        }
        let join = self
            .join
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(join) = join
            && join.join().is_err()
        {
            tracing::warn!(owner = %self.name, "Event loop thread panicked");
        }
    }

    /// Number of jobs accepted through [`OwnerContext::post`].
    #[must_use]
    pub fn posted_count(&self) -> usize {
        self.posted.load(Ordering::Acquire)
    }
}

impl OwnerContext for EventLoopOwner {
    fn is_surface_realized(&self) -> bool {
        self.realized.load(Ordering::Acquire)
    }

    fn owning_thread(&self) -> ThreadToken {
        self.thread
    }

    fn post(&self, job: Job) -> Result<(), MarshalError> {
        let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let sender = guard.as_ref().ok_or(MarshalError::Closed)?;
        sender.send(job).map_err(|_| MarshalError::Closed)?;
        self.posted.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn realization(&self) -> Option<&RealizationLatch> {
        Some(&self.latch)
    }
}
