// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use jobdispatch::{Job, JobDispatcher, JobHandle, JobState};
use jobdispatch_tests::gate::Gate;
use jobdispatch_tests::host_loop::{init_logging, pump_until_finished};
use jobdispatch_tests::recorder::Recorder;

fn gated_job(desc: &str, gate: &Gate) -> Job {
    let gate = gate.clone();
    Job::new(desc, move |_job| {
        gate.enter();
        Ok(())
    })
}

fn recording_job(name: &'static str, recorder: &Recorder) -> Job {
    let recorder = recorder.clone();
    Job::new(name, move |_job| {
        recorder.record(name);
        Ok(())
    })
}

#[test]
fn test_prioritised_job_overtakes_earlier_submissions() {
    init_logging();
    let dispatcher = JobDispatcher::new(1).unwrap();
    let gate = Gate::new();
    let recorder = Recorder::new();

    // keep the only worker busy so that A, B and C all wait in the queue
    let blocker = dispatcher.submit(gated_job("blocker", &gate)).unwrap();
    gate.await_entered();

    let a = dispatcher.submit(recording_job("A", &recorder)).unwrap();
    let b = dispatcher.submit(recording_job("B", &recorder)).unwrap();
    let c = dispatcher.submit(recording_job("C", &recorder)).unwrap();
    assert!(dispatcher.prioritise(&c).unwrap());

    gate.open();
    assert!(pump_until_finished(
        &dispatcher,
        &[blocker, a, b, c],
        Duration::from_secs(5)
    ));
    assert_eq!(recorder.events(), vec!["C", "A", "B"]);
}

#[test]
fn test_prioritise_has_no_effect_on_running_job() {
    init_logging();
    let dispatcher = JobDispatcher::new(1).unwrap();
    let gate = Gate::new();
    let recorder = Recorder::new();

    let running = dispatcher.submit(gated_job("running", &gate)).unwrap();
    gate.await_entered();
    let queued = dispatcher.submit(recording_job("queued", &recorder)).unwrap();

    assert!(!dispatcher.prioritise(&running).unwrap());
    assert_eq!(dispatcher.state(&running), JobState::RunningAsync);
    assert_eq!(dispatcher.state(&queued), JobState::QueuedAsync);

    gate.open();
    assert!(pump_until_finished(
        &dispatcher,
        &[running, queued],
        Duration::from_secs(5)
    ));
}

#[test]
fn test_cancel_running_job_that_checks_cancellation() {
    init_logging();
    let dispatcher = JobDispatcher::new(2).unwrap();
    let recorder = Recorder::new();
    let gate = Gate::new();

    let entered = gate.clone();
    let idle_recorder = recorder.clone();
    let d = dispatcher
        .submit(
            Job::new("D", move |job| {
                entered.mark_entered();
                loop {
                    job.check_cancellation()?;
                    thread::sleep(Duration::from_millis(1));
                }
            })
            .with_idle(move |_job| {
                idle_recorder.record("idle D");
                Ok(())
            }),
        )
        .unwrap();

    gate.await_entered();
    dispatcher.cancel(&d).unwrap();

    assert!(pump_until_finished(
        &dispatcher,
        &[d.clone()],
        Duration::from_secs(5)
    ));
    // give a stray idle body every chance to show up
    dispatcher.run_idle_work();
    assert_eq!(d.state(), JobState::Cancelled);
    assert_eq!(recorder.count("idle D"), 0);
}

#[test]
fn test_sprint_waits_for_sleeping_job() {
    init_logging();
    let dispatcher = JobDispatcher::new(1).unwrap();
    let recorder = Recorder::new();

    let idle_recorder = recorder.clone();
    let started = Instant::now();
    let e = dispatcher
        .submit(
            Job::new("E", |_job| {
                thread::sleep(Duration::from_millis(100));
                Ok(())
            })
            .with_idle(move |_job| {
                idle_recorder.record("E delivered");
                Ok(())
            }),
        )
        .unwrap();

    let outcome = dispatcher.sprint(&e).unwrap();

    assert!(started.elapsed() >= Duration::from_millis(100));
    assert!(outcome.is_completed());
    assert_eq!(recorder.events(), vec!["E delivered"]);
    assert_eq!(dispatcher.run_idle_work(), 0);
    assert_eq!(recorder.events().len(), 1);
}

#[test]
fn test_sprint_does_not_depend_on_workers() {
    init_logging();
    let dispatcher = JobDispatcher::new(1).unwrap();
    let gate = Gate::new();
    let recorder = Recorder::new();

    let blocker = dispatcher.submit(gated_job("blocker", &gate)).unwrap();
    gate.await_entered();

    let idle_recorder = recorder.clone();
    let queued = dispatcher
        .submit(recording_job("async", &recorder).with_idle(move |_job| {
            idle_recorder.record("idle");
            Ok(())
        }))
        .unwrap();

    // the only worker is still blocked while this returns
    let outcome = dispatcher.sprint(&queued).unwrap();
    assert!(outcome.is_completed());
    assert_eq!(recorder.events(), vec!["async", "idle"]);
    assert_eq!(dispatcher.state(&blocker), JobState::RunningAsync);

    gate.open();
    assert!(pump_until_finished(
        &dispatcher,
        &[blocker],
        Duration::from_secs(5)
    ));
}

#[test]
fn test_bodies_never_overlap_and_idle_follows_async() {
    init_logging();
    let dispatcher = JobDispatcher::new(4).unwrap();

    let handles: Vec<JobHandle> = (0..100)
        .map(|n| {
            // 0 = nothing ran, 1 = async running, 2 = async done, 3 = idle running, 4 = done
            let phase = Arc::new(AtomicU8::new(0));
            let idle_phase = phase.clone();
            let job = Job::new(format!("phase {n}"), move |_job| {
                assert_eq!(phase.swap(1, Ordering::SeqCst), 0);
                thread::sleep(Duration::from_micros(200));
                assert_eq!(phase.swap(2, Ordering::SeqCst), 1);
                Ok(())
            })
            .with_idle(move |_job| {
                assert_eq!(idle_phase.swap(3, Ordering::SeqCst), 2);
                assert_eq!(idle_phase.swap(4, Ordering::SeqCst), 3);
                Ok(())
            });
            dispatcher.submit(job).unwrap()
        })
        .collect();

    // sprint a few from the main context while the rest go through the workers
    for handle in handles.iter().step_by(10) {
        let _ = dispatcher.sprint(handle);
    }

    assert!(pump_until_finished(
        &dispatcher,
        &handles,
        Duration::from_secs(10)
    ));
    for handle in &handles {
        let outcome = handle.outcome().unwrap();
        assert!(outcome.is_completed(), "{handle:?}");
        assert!(!outcome.is_faulted(), "{handle:?}: {:?}", outcome.fault);
    }
}
