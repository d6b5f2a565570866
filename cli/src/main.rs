//! Handoff demo - workers handing actions to an owner thread whose surface
//! appears late.
//!
//! # Flow
//!
//! ```text
//! main thread:   bind owner ─► pump jobs ──────────────────────────► exit
//! driver thread: defer A, B, C ─► realize ─► call_on_main ─► async call ─► workers ─► dispose
//!                                   │
//!                 poller ───────────┴─► drain A, B, C on the main thread
//! ```
//!
//! Logging goes to stderr; set `RUST_LOG=debug` to watch the queue, poller
//! and drain transitions.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use handoff_core::{
    DispatchConfig, Dispatcher, EventLoopOwner, Hooks, Registration, SharedOwner, ThreadToken,
};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const WORKERS: u32 = 8;

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(env_filter)
        .init();
}

#[derive(Debug, Default)]
struct ReportCounts {
    errors: AtomicUsize,
    faults: AtomicUsize,
}

fn counting_hooks(counts: &Arc<ReportCounts>) -> Hooks {
    let errors = Arc::clone(counts);
    let faults = Arc::clone(counts);
    Hooks::new()
        .on_error(move |_| {
            errors.errors.fetch_add(1, Ordering::Relaxed);
        })
        .on_fault(move |_, _| {
            faults.faults.fetch_add(1, Ordering::Relaxed);
        })
}

fn main() -> Result<()> {
    init_tracing();

    let config = DispatchConfig::load();
    tracing::info!(
        poll_interval_ms = config.poll_interval().as_millis() as u64,
        realize_timeout_ms = config.realize_timeout().map(|t| t.as_millis() as u64),
        "Dispatch settings loaded"
    );
    let dispatcher = Dispatcher::new(config);

    let (owner, pump) = EventLoopOwner::bind_current("handoff-main");
    let counts = Arc::new(ReportCounts::default());
    let shared: SharedOwner = owner.clone();
    dispatcher.init(Registration::new(Some(shared), counting_hooks(&counts)));

    let driver = thread::Builder::new()
        .name("handoff-driver".to_string())
        .spawn({
            let dispatcher = dispatcher.clone();
            let owner = Arc::clone(&owner);
            move || {
                let result = drive(&dispatcher, &owner);
                owner.dispose();
                result
            }
        })
        .context("failed to spawn driver thread")?;

    pump.run();
    driver
        .join()
        .map_err(|_| anyhow!("driver thread panicked"))??;

    tracing::info!(
        errors = counts.errors.load(Ordering::Relaxed),
        faults = counts.faults.load(Ordering::Relaxed),
        "Demo finished"
    );
    Ok(())
}

fn drive(dispatcher: &Dispatcher, owner: &Arc<EventLoopOwner>) -> Result<()> {
    let target: SharedOwner = owner.clone();
    for label in ["A", "B", "C"] {
        let outcome = dispatcher.run_on_target(Some(&target), move || {
            tracing::info!(action = label, thread = %ThreadToken::current(), "Deferred action ran");
        })?;
        tracing::info!(action = label, outcome = outcome.label(), "Dispatched");
    }

    thread::sleep(Duration::from_millis(100));
    tracing::info!(pending = dispatcher.pending_len(), "Realizing owner surface");
    owner.realize();

    let answer = dispatcher.call_on_main(|| 6 * 7)?;
    tracing::info!(answer = ?answer, "call_on_main returned");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .context("failed to build async runtime")?;
    let called_on = runtime.block_on(dispatcher.call_on_main_async(|| {
        let thread = ThreadToken::current();
        async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            thread
        }
    }))?;
    tracing::info!(called_on = ?called_on, "call_on_main_async returned");

    let handles: Vec<_> = (0..WORKERS)
        .map(|n| {
            let dispatcher = dispatcher.clone();
            thread::spawn(move || dispatcher.call_on_main(move || n * n))
        })
        .collect();
    let mut total = 0;
    for handle in handles {
        let outcome = handle
            .join()
            .map_err(|_| anyhow!("worker thread panicked"))??;
        total += outcome.value_or_default();
    }
    tracing::info!(workers = WORKERS, total, "Workers finished");
    Ok(())
}
