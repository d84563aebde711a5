//! # Interceptor State Machine Tests
//!
//! End-to-end cycles against a scripted runtime: admission, triggering,
//! shedding during the drain, collection and reset.

mod common;

use common::{ScriptedHeap, HUGE_ALLOC};
use gc_interceptor::{
    CollectorState, GciError, Interceptor, InterceptorConfig, ShedResponse, ThresholdPolicy,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const MIB: u64 = 1024 * 1024;

fn config_with_rate(rate: u64) -> InterceptorConfig {
    InterceptorConfig {
        default_sample_rate: rate,
        drain_poll_interval_ms: 1,
        ..Default::default()
    }
}

/// Construction switches the runtime's own collection scheduling off.
#[test]
fn test_construction_disables_automatic_collection() {
    let heap = ScriptedHeap::new();
    let _gci = Interceptor::new(InterceptorConfig::default(), heap.clone()).unwrap();
    assert!(heap.auto_disabled());
}

#[test]
fn test_invalid_config_is_rejected() {
    let heap = ScriptedHeap::new();
    let config = InterceptorConfig {
        default_sample_rate: 0,
        ..Default::default()
    };
    let result = Interceptor::new(config, heap.clone());
    assert!(matches!(result, Err(GciError::InvalidConfig(_))));
    assert!(!heap.auto_disabled(), "Nothing is touched when validation fails");
}

/// Without pressure, every pair is admitted and counters move in lockstep.
#[test]
fn test_no_pressure_lockstep() {
    let t = Instant::now();

    let heap = ScriptedHeap::new();
    let gci = Interceptor::new(config_with_rate(1), heap.clone()).unwrap();

    for i in 1..=200 {
        let r = gci.before();
        assert!(!r.should_shed);
        assert_eq!(gci.snapshot().incoming, i);
        gci.after(r);
        let snap = gci.snapshot();
        assert_eq!(snap.finished, i);
        assert_eq!(snap.incoming, snap.finished);
    }
    assert_eq!(heap.collections(), 0);
    assert_eq!(gci.snapshot().state, CollectorState::Idle);

    let overhead = t.elapsed();
    println!("test_no_pressure_lockstep: Testing Overhead = {:?}", overhead);
}

/// Scripted scenario: sample interval 2, pressure always on.
#[test]
fn test_collection_cycle_end_to_end() {
    let heap = ScriptedHeap::new();
    heap.set_collect_delay(Duration::from_millis(20));
    let gci = Interceptor::new(config_with_rate(2), heap.clone()).unwrap();

    for round in 1..=2u64 {
        heap.set_alloc(HUGE_ALLOC);

        // Not a sampling tick: admitted without looking at the heap.
        let r1 = gci.before();
        assert!(!r1.should_shed);

        // Sampling tick under pressure: triggers and is itself shed.
        let r2 = gci.before();
        assert!(r2.should_shed);
        assert_eq!(gci.snapshot().state, CollectorState::Collecting);
        assert!(r2.unavailability > Duration::ZERO);

        // Arrives while r1 is still being drained.
        let r3 = gci.before();
        assert!(r3.should_shed);
        assert!(r3.unavailability > Duration::ZERO);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(heap.collections() as u64, round - 1, "Drain must wait for r1");

        gci.after(r1);
        gci.after(r2);
        gci.after(r3);
        gci.wait_idle();

        let snap = gci.snapshot();
        assert_eq!(snap.state, CollectorState::Idle);
        assert_eq!((snap.incoming, snap.finished, snap.shed), (0, 0, 0));
        assert_eq!(snap.cycles, round);
        assert_eq!(heap.collections() as u64, round);

        // The next request is admitted normally.
        let next = gci.before();
        assert!(!next.should_shed);
        gci.after(next);
        assert_eq!(gci.snapshot().finished, 1);

        // Close the sampling period; the heap was just collected, so the
        // check on this tick finds no pressure.
        let r = gci.before();
        assert!(!r.should_shed);
        gci.after(r);
    }
    assert!(gci.unavailability().gc_estimation() >= Duration::from_millis(20));
}

/// An arrival counted after the drain but before the cycle closes is
/// carried into the next cycle, so the next drain still waits for it and
/// for everything admitted alongside it.
#[test]
fn test_late_arrival_survives_cycle_reset() {
    let heap = ScriptedHeap::new();
    let gci = Interceptor::new(config_with_rate(3), heap.clone()).unwrap();

    // A request that passed the gate check just before it closed, and whose
    // increment lands while the collection runs.
    let late = gci.clone();
    heap.set_on_collect(move || {
        late.counters().arrive();
    });
    assert!(gci.trigger_collection());
    gci.wait_idle();

    let snap = gci.snapshot();
    assert_eq!(snap.cycles, 1);
    assert_eq!((snap.incoming, snap.finished), (1, 0), "The late arrival is still owed");

    // Next cycle: B is the second arrival and in flight, the third is a
    // sampling tick and triggers.
    heap.set_alloc(HUGE_ALLOC);
    let b = gci.before();
    assert!(!b.should_shed);
    assert!(gci.before().should_shed);

    // The late request reports; B is still running, so nothing is collected.
    gci.after(ShedResponse::admitted(Instant::now()));
    thread::sleep(Duration::from_millis(30));
    assert_eq!(heap.collections(), 1, "Drain must still wait for B");

    gci.after(b);
    gci.wait_idle();
    assert_eq!(heap.collections(), 2);
    let snap = gci.snapshot();
    assert_eq!((snap.incoming, snap.finished), (0, 0));
}

/// A request that never reports back holds the collection indefinitely.
#[test]
fn test_missing_after_stalls_drain() {
    let heap = ScriptedHeap::new();
    let gci = Interceptor::new(config_with_rate(2), heap.clone()).unwrap();
    heap.set_alloc(HUGE_ALLOC);

    let pending = gci.before();
    assert!(!pending.should_shed);
    assert!(gci.before().should_shed);

    thread::sleep(Duration::from_millis(50));
    assert_eq!(heap.collections(), 0);
    assert_eq!(gci.snapshot().state, CollectorState::Collecting);

    gci.after(pending);
    gci.wait_idle();
    assert_eq!(heap.collections(), 1);
}

/// The `Admission` guard reports the request even when the handler panics.
#[test]
fn test_admission_guard_reports_on_unwind() {
    let heap = ScriptedHeap::new();
    let gci = Interceptor::new(config_with_rate(5), heap).unwrap();

    let cloned = gci.clone();
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
        let _admission = cloned.admit().expect("no pressure, must be admitted");
        panic!("handler failure");
    }));
    assert!(result.is_err());

    let snap = gci.snapshot();
    assert_eq!((snap.incoming, snap.finished), (1, 1));

    let admission = gci.admit().unwrap();
    assert!(!admission.response().should_shed);
    admission.finish();
    assert_eq!(gci.snapshot().finished, 2);
}

#[test]
fn test_admit_returns_shed_response() {
    let heap = ScriptedHeap::new();
    let gci = Interceptor::new(config_with_rate(1), heap.clone()).unwrap();
    heap.set_alloc(HUGE_ALLOC);

    let shed = gci.admit().err().expect("pressure on a sampling tick sheds");
    assert!(shed.should_shed);
    gci.wait_idle();
    assert_eq!(heap.collections(), 1);
}

#[test]
fn test_trigger_collection_is_exclusive() {
    let heap = ScriptedHeap::new();
    heap.set_collect_delay(Duration::from_millis(30));
    let gci = Interceptor::new(config_with_rate(10), heap.clone()).unwrap();

    assert!(gci.trigger_collection());
    assert!(!gci.trigger_collection(), "A cycle is already running");
    assert!(gci.before().should_shed);

    gci.wait_idle();
    assert_eq!(heap.collections(), 1);
    assert_eq!(gci.snapshot().cycles, 1);
}

/// With the window-max policy, the threshold is exactly the bounded
/// maximum of recent heap growth.
#[test]
fn test_window_max_policy() {
    let heap = ScriptedHeap::new();
    let config = InterceptorConfig {
        min_shedding_threshold: MIB,
        default_sample_rate: 1,
        drain_poll_interval_ms: 1,
        threshold_policy: ThresholdPolicy::WindowMax,
        ..Default::default()
    };
    let gci = Interceptor::new(config, heap.clone()).unwrap();
    let initial = gci.snapshot().threshold;
    assert!(initial >= MIB && initial <= 2 * MIB, "Monitor draws its own jitter");

    heap.set_alloc(40 * MIB);
    assert!(gci.before().should_shed);
    gci.wait_idle();
    assert_eq!(gci.snapshot().threshold, 40 * MIB);
}

/// With the feedback policy, the installed threshold is the estimator's.
#[test]
fn test_feedback_policy_installs_estimator_value() {
    let heap = ScriptedHeap::new();
    let config = InterceptorConfig {
        min_shedding_threshold: MIB,
        default_sample_rate: 1,
        drain_poll_interval_ms: 1,
        ..Default::default()
    };
    let gci = Interceptor::new(config, heap.clone()).unwrap();
    assert_eq!(gci.snapshot().threshold, gci.threshold_estimator().get());

    heap.set_alloc(40 * MIB);
    assert!(gci.before().should_shed);
    gci.wait_idle();

    let threshold = gci.snapshot().threshold;
    assert_eq!(threshold, gci.threshold_estimator().get());
    assert!(threshold >= 39 * MIB && threshold <= 41 * MIB);
    assert_eq!(gci.threshold_estimator().cycles_seen(), 1);
}

/// The sampler learns the number of requests finished between cycles.
#[test]
fn test_sampler_learns_from_cycles() {
    let heap = ScriptedHeap::new();
    let gci = Interceptor::new(config_with_rate(10), heap.clone()).unwrap();

    // 7 finished requests, then an out-of-band cycle.
    for _ in 0..7 {
        let r = gci.before();
        gci.after(r);
    }
    assert!(gci.trigger_collection());
    gci.wait_idle();
    assert_eq!(gci.sampler().get(), 7);
}

/// Many concurrent callers: one collector per cycle, no lost accounting.
#[test]
fn test_concurrent_callers_single_collector() {
    let t = Instant::now();

    let heap = ScriptedHeap::new();
    heap.set_collect_delay(Duration::from_millis(2));
    let gci = Interceptor::new(config_with_rate(1), heap.clone()).unwrap();

    let admitted = Arc::new(AtomicU64::new(0));
    let reported = Arc::new(AtomicU64::new(0));
    let shed = Arc::new(AtomicU64::new(0));

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let gci = gci.clone();
            let heap = heap.clone();
            let (admitted, reported, shed) = (admitted.clone(), reported.clone(), shed.clone());
            thread::spawn(move || {
                for i in 0..2_000 {
                    if i % 100 == 0 {
                        heap.set_alloc(HUGE_ALLOC);
                    }
                    let r = gci.before();
                    if r.should_shed {
                        shed.fetch_add(1, Ordering::SeqCst);
                        continue;
                    }
                    admitted.fetch_add(1, Ordering::SeqCst);
                    gci.after(r);
                    reported.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();

    for w in workers {
        w.join().unwrap();
    }
    gci.wait_idle();

    let snap = gci.snapshot();
    assert_eq!(snap.state, CollectorState::Idle);
    assert_eq!(admitted.load(Ordering::SeqCst), reported.load(Ordering::SeqCst));
    assert_eq!(
        admitted.load(Ordering::SeqCst) + shed.load(Ordering::SeqCst),
        16_000
    );
    assert!(heap.collections() > 0);
    assert_eq!(heap.max_concurrent_collections(), 1, "CAS must never double-admit");
    assert_eq!(heap.collections() as u64, snap.cycles);

    let overhead = t.elapsed();
    println!(
        "test_concurrent_callers_single_collector: {} cycles, Testing Overhead = {:?}",
        snap.cycles, overhead
    );
}
