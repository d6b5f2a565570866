//! Async dispatch variants

use std::future::{self, Ready};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use handoff_core::{
    DispatchError, DispatchOutcome, Dispatcher, FixedThread, OwnerContext, Registration,
    ThreadToken,
};

use crate::common::{Recorder, dispatcher_for, fast_config, spawn_owner};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn main_async_calls_on_owner_and_awaits_result() {
    let (owner, shared) = spawn_owner("async-main");
    owner.realize();
    let dispatcher = dispatcher_for(&shared, &Recorder::new());

    let outcome = dispatcher
        .call_on_main_async(|| {
            let called_on = ThreadToken::current();
            async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                called_on
            }
        })
        .await
        .expect("no fault");

    assert_eq!(outcome, DispatchOutcome::Completed(owner.owning_thread()));
    owner.shutdown();
}

#[tokio::test]
async fn main_async_waits_for_realization() {
    let (owner, shared) = spawn_owner("async-wait");
    let recorder = Recorder::new();
    let dispatcher = dispatcher_for(&shared, &recorder);

    let pending = tokio::spawn(dispatcher.call_on_main_async(|| async { "ready" }));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!pending.is_finished());

    owner.realize();
    let outcome = pending.await.expect("task joins").expect("no fault");
    assert_eq!(outcome, DispatchOutcome::Completed("ready"));
    assert_eq!(recorder.errors_containing("MainForm has no realized surface"), 1);
    owner.shutdown();
}

#[tokio::test]
async fn main_async_without_owner_aborts() {
    let recorder = Recorder::new();
    let dispatcher = Dispatcher::new(fast_config());
    dispatcher.init(Registration::new(None, recorder.hooks()));

    let outcome = dispatcher
        .call_on_main_async(|| async { 1 })
        .await
        .expect("no fault");

    assert_eq!(outcome, DispatchOutcome::AbortedNoOwner);
    assert_eq!(recorder.errors_containing("MainForm is null"), 1);
}

#[tokio::test]
async fn owner_thread_calls_action_before_returning() {
    let pretend = ThreadToken::from_raw(4_242);
    let dispatcher = Dispatcher::with_identity(fast_config(), FixedThread(pretend));
    let registration = Registration::new(None, Recorder::new().hooks());
    dispatcher.init(registration.with_owner_thread(pretend));
    let calls = Arc::new(AtomicUsize::new(0));

    let fut = {
        let calls = Arc::clone(&calls);
        dispatcher.call_on_main_async(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { 8 }
        })
    };
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(fut.await, Ok(DispatchOutcome::Completed(8)));
}

async fn fail_after_yield() -> u8 {
    tokio::task::yield_now().await;
    panic!("future failed")
}

#[tokio::test]
async fn panicking_future_is_returned_as_error() {
    let (owner, shared) = spawn_owner("async-panic");
    owner.realize();
    let dispatcher = dispatcher_for(&shared, &Recorder::new());

    let result = dispatcher.call_on_main_async(fail_after_yield).await;

    assert_eq!(
        result,
        Err(DispatchError::ActionPanicked {
            message: "future failed".to_string()
        })
    );
    owner.shutdown();
}

#[tokio::test]
async fn target_async_waits_for_live_main_over_realized_target() {
    let (main, main_shared) = spawn_owner("async-wait-main");
    let (target, target_shared) = spawn_owner("async-ready-target");
    target.realize();
    let dispatcher = dispatcher_for(&main_shared, &Recorder::new());

    let pending = tokio::spawn(dispatcher.call_on_target_async(Some(&target_shared), || {
        let called_on = ThreadToken::current();
        async move { called_on }
    }));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!pending.is_finished());
    assert_eq!(dispatcher.pending_len(), 0);

    main.realize();
    let outcome = pending.await.expect("task joins").expect("no fault");
    assert_eq!(outcome, DispatchOutcome::Completed(main.owning_thread()));
    assert_eq!(target.posted_count(), 0);
    main.shutdown();
    target.shutdown();
}

#[tokio::test]
async fn target_async_queues_until_a_main_owner_drains() {
    let (main, main_shared) = spawn_owner("async-queue-main");
    let (target, target_shared) = spawn_owner("async-queue-target");
    let recorder = Recorder::new();
    let dispatcher = Dispatcher::new(fast_config());
    dispatcher.init(Registration::new(None, recorder.hooks()));

    let pending = tokio::spawn(dispatcher.call_on_target_async(Some(&target_shared), || {
        let called_on = ThreadToken::current();
        async move { called_on }
    }));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!pending.is_finished());
    assert_eq!(dispatcher.pending_len(), 1);
    assert_eq!(recorder.errors_containing("target has no realized surface"), 1);

    main.realize();
    dispatcher.init(Registration::new(Some(main_shared), recorder.hooks()));
    let drained_by = dispatcher.call_on_main_async(|| async { "later" }).await;
    assert_eq!(drained_by, Ok(DispatchOutcome::Completed("later")));

    let outcome = pending.await.expect("task joins").expect("no fault");
    assert_eq!(outcome, DispatchOutcome::Completed(main.owning_thread()));
    assert_eq!(target.posted_count(), 0);
    main.shutdown();
    target.shutdown();
}

#[tokio::test]
async fn target_async_uses_realized_target_without_main() {
    let (target, target_shared) = spawn_owner("async-target");
    target.realize();
    let dispatcher = Dispatcher::new(fast_config());

    let outcome = dispatcher
        .call_on_target_async(Some(&target_shared), || {
            let called_on = ThreadToken::current();
            async move { called_on }
        })
        .await
        .expect("no fault");

    assert_eq!(outcome, DispatchOutcome::Completed(target.owning_thread()));
    target.shutdown();
}

#[tokio::test]
async fn queued_async_action_panic_is_reported_and_abandoned() {
    let (main, main_shared) = spawn_owner("async-abandoned");
    let (target, target_shared) = spawn_owner("async-abandoned-target");
    let recorder = Recorder::new();
    let dispatcher = Dispatcher::new(fast_config());
    dispatcher.init(Registration::new(None, recorder.hooks()));

    let pending = tokio::spawn(
        dispatcher.call_on_target_async(Some(&target_shared), || -> Ready<u8> {
            panic!("queued async failed")
        }),
    );
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(dispatcher.pending_len(), 1);

    main.realize();
    dispatcher.init(Registration::new(Some(main_shared), recorder.hooks()));
    let _ = dispatcher.call_on_main_async(|| async {}).await;

    let result = pending.await.expect("task joins");
    assert_eq!(result, Err(DispatchError::Abandoned));
    let faults = recorder.faults();
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].message, "queued async failed");
    assert!(faults[0].file.ends_with("async_dispatch.rs"));
    main.shutdown();
    target.shutdown();
}

#[tokio::test]
async fn target_async_null_target_aborts() {
    let recorder = Recorder::new();
    let dispatcher = Dispatcher::new(fast_config());
    dispatcher.init(Registration::new(None, recorder.hooks()));

    let outcome = dispatcher
        .call_on_target_async(None, || future::ready(()))
        .await;

    assert_eq!(outcome, Ok(DispatchOutcome::AbortedNoOwner));
    assert_eq!(recorder.errors_containing("target is null"), 1);
}
