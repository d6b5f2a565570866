//! Deferred actions: FIFO drain, one-shot poller, fault isolation

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

use handoff_core::{
    DispatchOutcome, Dispatcher, OwnerContext, Registration, SharedOwner, ThreadToken,
};

use crate::common::{Recorder, dispatcher_for, fast_config, spawn_owner, wait_for};

type Log = Arc<Mutex<Vec<(&'static str, ThreadToken)>>>;

fn logging(log: &Log, label: &'static str) -> impl FnOnce() + Send + 'static {
    let log = Arc::clone(log);
    move || log.lock().unwrap().push((label, ThreadToken::current()))
}

#[test]
fn deferred_actions_run_in_order_before_later_dispatch() {
    let (owner, shared) = spawn_owner("deferral-order");
    let recorder = Recorder::new();
    let dispatcher = dispatcher_for(&shared, &recorder);
    let log: Log = Arc::default();

    for label in ["A", "B", "C"] {
        assert_eq!(
            dispatcher.run_on_target(Some(&shared), logging(&log, label)),
            Ok(DispatchOutcome::Deferred)
        );
    }
    assert_eq!(dispatcher.pending_len(), 3);
    assert!(log.lock().unwrap().is_empty());

    owner.realize();
    assert_eq!(
        dispatcher.run_on_main(logging(&log, "D")),
        Ok(DispatchOutcome::Completed(()))
    );

    let log = log.lock().unwrap();
    let labels: Vec<_> = log.iter().map(|(label, _)| *label).collect();
    assert_eq!(labels, ["A", "B", "C", "D"]);
    assert!(log.iter().all(|(_, thread)| *thread == owner.owning_thread()));
    assert_eq!(dispatcher.pending_len(), 0);
    owner.shutdown();
}

#[test]
fn poller_drains_without_further_dispatch() {
    let (owner, shared) = spawn_owner("deferral-poller");
    let dispatcher = dispatcher_for(&shared, &Recorder::new());
    let log: Log = Arc::default();

    for label in ["first", "second"] {
        let _ = dispatcher.run_on_target(Some(&shared), logging(&log, label));
    }
    assert!(dispatcher.is_poller_armed());

    owner.realize();
    assert!(wait_for(Duration::from_secs(5), || dispatcher.is_drained()));

    let labels: Vec<_> = log.lock().unwrap().iter().map(|(label, _)| *label).collect();
    assert_eq!(labels, ["first", "second"]);
    owner.shutdown();
}

#[test]
fn concurrent_deferrals_arm_one_poller_and_run_once() {
    let (owner, shared) = spawn_owner("deferral-concurrent");
    let dispatcher = dispatcher_for(&shared, &Recorder::new());
    let ran = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(32));

    let handles: Vec<_> = (0..32)
        .map(|_| {
            let dispatcher = dispatcher.clone();
            let shared: SharedOwner = Arc::clone(&shared);
            let ran = Arc::clone(&ran);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                dispatcher.run_on_target(Some(&shared), move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                })
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(
            handle.join().expect("worker joins"),
            Ok(DispatchOutcome::Deferred)
        );
    }
    assert_eq!(dispatcher.pending_len(), 32);
    assert!(dispatcher.is_poller_armed());

    owner.realize();
    assert!(wait_for(Duration::from_secs(5), || dispatcher.is_drained()));
    assert_eq!(ran.load(Ordering::SeqCst), 32);
    owner.shutdown();
}

#[test]
fn repeated_realization_drains_once() {
    let (owner, shared) = spawn_owner("deferral-twice");
    let dispatcher = dispatcher_for(&shared, &Recorder::new());
    let ran = Arc::new(AtomicUsize::new(0));
    {
        let ran = Arc::clone(&ran);
        let _ = dispatcher.run_on_target(Some(&shared), move || {
            ran.fetch_add(1, Ordering::SeqCst);
        });
    }

    owner.realize();
    owner.realize();
    // Race the poller's drain against dispatch-triggered ones.
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let dispatcher = dispatcher.clone();
            thread::spawn(move || dispatcher.run_on_main(|| {}))
        })
        .collect();
    for handle in handles {
        assert_eq!(
            handle.join().expect("worker joins"),
            Ok(DispatchOutcome::Completed(()))
        );
    }
    assert!(wait_for(Duration::from_secs(5), || dispatcher.is_drained()));
    thread::sleep(Duration::from_millis(20));
    assert_eq!(ran.load(Ordering::SeqCst), 1);
    owner.shutdown();
}

#[test]
fn failing_deferred_action_is_isolated_and_attributed() {
    let (owner, shared) = spawn_owner("deferral-fault");
    let recorder = Recorder::new();
    let dispatcher = dispatcher_for(&shared, &recorder);
    let log: Log = Arc::default();

    let _ = dispatcher.run_on_target(Some(&shared), logging(&log, "one"));
    let failing_line = line!() + 1;
    let _ = dispatcher.run_on_target(Some(&shared), || panic!("second action failed"));
    let _ = dispatcher.run_on_target(Some(&shared), logging(&log, "three"));

    owner.realize();
    assert_eq!(
        dispatcher.call_on_main(|| "after"),
        Ok(DispatchOutcome::Completed("after"))
    );

    let labels: Vec<_> = log.lock().unwrap().iter().map(|(label, _)| *label).collect();
    assert_eq!(labels, ["one", "three"]);

    let faults = recorder.faults();
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].message, "second action failed");
    assert!(faults[0].file.ends_with("deferral.rs"));
    assert_eq!(faults[0].line, failing_line);
    assert!(faults[0].report.contains("deferral.rs"));
    owner.shutdown();
}

#[test]
fn target_without_main_owner_stays_queued() {
    let (target, target_shared) = spawn_owner("deferral-gated");
    let recorder = Recorder::new();
    let dispatcher = Dispatcher::new(fast_config());
    dispatcher.init(Registration::new(None, recorder.hooks()));
    let ran = Arc::new(AtomicUsize::new(0));
    {
        let ran = Arc::clone(&ran);
        assert_eq!(
            dispatcher.run_on_target(Some(&target_shared), move || {
                ran.fetch_add(1, Ordering::SeqCst);
            }),
            Ok(DispatchOutcome::Deferred)
        );
    }
    assert_eq!(recorder.errors_containing("target has no realized surface"), 1);

    // No main owner: no poller, so the action waits even once the target is ready.
    target.realize();
    thread::sleep(Duration::from_millis(30));
    assert!(!dispatcher.is_poller_armed());
    assert_eq!(dispatcher.pending_len(), 1);
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    target.shutdown();
}

#[test]
fn deferred_actions_run_on_main_not_target() {
    let (main, main_shared) = spawn_owner("deferral-main");
    let (target, target_shared) = spawn_owner("deferral-target");
    let dispatcher = dispatcher_for(&main_shared, &Recorder::new());
    let log: Log = Arc::default();

    let _ = dispatcher.run_on_target(Some(&target_shared), logging(&log, "queued"));
    main.realize();
    assert!(wait_for(Duration::from_secs(5), || dispatcher.is_drained()));

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].1, main.owning_thread());
    assert_eq!(target.posted_count(), 0);
    main.shutdown();
    target.shutdown();
}

#[test]
fn live_main_queues_even_when_target_is_realized() {
    let (main, main_shared) = spawn_owner("deferral-live-main");
    let (target, target_shared) = spawn_owner("deferral-ready-target");
    target.realize();
    let recorder = Recorder::new();
    let dispatcher = dispatcher_for(&main_shared, &recorder);
    let log: Log = Arc::default();

    assert_eq!(
        dispatcher.run_on_target(Some(&target_shared), logging(&log, "queued")),
        Ok(DispatchOutcome::Deferred)
    );
    assert_eq!(dispatcher.pending_len(), 1);
    assert!(dispatcher.is_poller_armed());
    assert!(recorder.errors().is_empty());
    assert!(
        recorder
            .traces()
            .iter()
            .any(|m| m.contains("MainForm has no realized surface"))
    );

    main.realize();
    assert!(wait_for(Duration::from_secs(5), || dispatcher.is_drained()));

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].1, main.owning_thread());
    assert_eq!(target.posted_count(), 0);
    main.shutdown();
    target.shutdown();
}

#[test]
fn queued_action_can_read_dispatcher_state_during_drain() {
    let (owner, shared) = spawn_owner("deferral-reentrant-read");
    let dispatcher = dispatcher_for(&shared, &Recorder::new());
    let seen = Arc::new(Mutex::new(None));

    {
        let dispatcher_in_action = dispatcher.clone();
        let seen = Arc::clone(&seen);
        let _ = dispatcher.run_on_target(Some(&shared), move || {
            let pending = dispatcher_in_action.pending_len();
            let described = format!("{dispatcher_in_action:?}");
            *seen.lock().unwrap() = Some((pending, described));
        });
    }
    let _ = dispatcher.run_on_target(Some(&shared), || {});
    assert_eq!(dispatcher.pending_len(), 2);

    owner.realize();
    assert!(wait_for(Duration::from_secs(5), || dispatcher.is_drained()));

    let seen = seen.lock().unwrap();
    let (pending, described) = seen.as_ref().expect("queued action ran");
    assert_eq!(*pending, 1);
    assert!(described.starts_with("Dispatcher"));
    assert_eq!(
        dispatcher.run_on_main(|| {}),
        Ok(DispatchOutcome::Completed(()))
    );
    owner.shutdown();
}
