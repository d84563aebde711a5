//! # gci-control: Interceptor
//!
//! The two-call admission contract. Every request calls `before` before
//! any work and `after` once the work ends, on every exit path. When heap
//! pressure is detected, a background task drains admitted requests, runs
//! exactly one collection, retunes the estimators and reopens the gate.
//! Requests arriving in between are shed with a retry hint.
//!
//! ## Mechanical Sympathy: Lock-Free Admission
//! `before` touches only single-word atomics. `after` takes the estimator
//! mutex to fold in the request duration; the drain lock is taken only
//! while a collection is pending.

use gci_core::{
    Clock, InterceptorConfig, ManagedHeap, Result, ShedResponse, SystemClock, ThresholdPolicy,
};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::counters::{CycleCounters, CycleTotals};
use crate::gate::{AdmissionGate, CollectorState};
use crate::heap::HeapMonitor;
use crate::sampler::Sampler;
use crate::threshold::ThresholdEstimator;
use crate::unavailability::UnavailabilityEstimator;

/// Point-in-time view of the interceptor's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterceptorSnapshot {
    pub incoming: u64,
    pub finished: u64,
    pub shed: u64,
    pub state: CollectorState,
    pub sample_rate: u64,
    pub threshold: u64,
    pub cycles: u64,
}

struct Shared<H> {
    config: InterceptorConfig,
    clock: Arc<dyn Clock>,

    counters: CycleCounters,
    cycles: AtomicU64,
    gate: AdmissionGate,

    sampler: Sampler,
    heap: HeapMonitor<H>,
    threshold: ThresholdEstimator,
    unavailability: UnavailabilityEstimator,

    drain_lock: Mutex<()>,
    drained: Condvar,
    collector: Mutex<Option<JoinHandle<()>>>,
}

/// Admission controller for a garbage-collected runtime.
///
/// Cheap to clone: clones share one state machine. Meant to be built once
/// at startup and handed to every request handler.
pub struct Interceptor<H: ManagedHeap> {
    shared: Arc<Shared<H>>,
}

impl<H: ManagedHeap> Clone for Interceptor<H> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

pub struct InterceptorBuilder<H> {
    heap: H,
    config: InterceptorConfig,
    clock: Arc<dyn Clock>,
}

impl<H: ManagedHeap> InterceptorBuilder<H> {
    pub fn new(heap: H) -> Self {
        Self {
            heap,
            config: InterceptorConfig::default(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_config(mut self, config: InterceptorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Validates the configuration, switches the runtime's automatic
    /// collection off and returns the interceptor.
    pub fn build(self) -> Result<Interceptor<H>> {
        let config = self.config;
        config.validate()?;

        self.heap.disable_automatic_collection();

        let threshold = ThresholdEstimator::new(&config);
        let heap = match config.threshold_policy {
            ThresholdPolicy::Feedback => HeapMonitor::with_threshold(
                self.heap,
                config.heap_history_size,
                threshold.get(),
                config.max_shedding_threshold,
            ),
            ThresholdPolicy::WindowMax => HeapMonitor::new(self.heap, &config),
        };

        tracing::info!(
            "Interceptor: automatic collection disabled (threshold: {} bytes, sample rate: {}, policy: {:?})",
            heap.threshold(),
            config.default_sample_rate,
            config.threshold_policy
        );

        let shared = Shared {
            sampler: Sampler::from_config(&config),
            unavailability: UnavailabilityEstimator::from_config(&config, Arc::clone(&self.clock)),
            heap,
            threshold,
            clock: self.clock,
            counters: CycleCounters::new(),
            cycles: AtomicU64::new(0),
            gate: AdmissionGate::new(),
            drain_lock: Mutex::new(()),
            drained: Condvar::new(),
            collector: Mutex::new(None),
            config,
        };
        Ok(Interceptor {
            shared: Arc::new(shared),
        })
    }
}

impl<H: ManagedHeap> Interceptor<H> {
    pub fn new(config: InterceptorConfig, heap: H) -> Result<Self> {
        InterceptorBuilder::new(heap).with_config(config).build()
    }

    pub fn builder(heap: H) -> InterceptorBuilder<H> {
        InterceptorBuilder::new(heap)
    }

    /// Must be the first call of every request.
    pub fn before(&self) -> ShedResponse {
        let s = &*self.shared;
        if s.gate.is_collecting() {
            return s.shed();
        }

        let incoming = s.counters.arrive();
        // The gate may have closed between the check and the increment.
        if s.gate.is_collecting() {
            s.counters.withdraw();
            return s.shed();
        }

        if incoming % s.sampler.get() == 0 && s.heap.should_collect() {
            // The trigger is shed, so it must not be waited for by the drain.
            s.counters.withdraw();
            if s.gate.try_begin() {
                Shared::spawn_collector(&self.shared);
            }
            return s.shed();
        }

        ShedResponse::admitted(s.clock.now())
    }

    /// Must run exactly once for every response of `before` that was not
    /// shed, including when processing failed. Shed responses are ignored.
    pub fn after(&self, response: ShedResponse) {
        if response.should_shed {
            return;
        }
        let s = &*self.shared;
        s.counters.finish();

        if let Some(start) = response.started_at() {
            s.unavailability
                .request_finished(s.clock.now().saturating_duration_since(start));
        }

        if s.gate.is_collecting() {
            let _guard = s.drain_lock.lock();
            s.drained.notify_one();
        }
    }

    /// `before` with the `after` obligation tied to a guard's lifetime.
    pub fn admit(&self) -> std::result::Result<Admission<H>, ShedResponse> {
        let response = self.before();
        if response.should_shed {
            return Err(response);
        }
        Ok(Admission {
            interceptor: self.clone(),
            response: Some(response),
        })
    }

    /// Starts a collection cycle out of band, as if pressure had been
    /// detected. Returns `false` if a cycle is already running.
    pub fn trigger_collection(&self) -> bool {
        if !self.shared.gate.try_begin() {
            return false;
        }
        Shared::spawn_collector(&self.shared);
        true
    }

    /// Blocks until no collection cycle is in flight.
    pub fn wait_idle(&self) {
        loop {
            let handle = self.shared.collector.lock().take();
            match handle {
                Some(handle) => {
                    if handle.join().is_err() {
                        tracing::error!("Interceptor: collector panicked; gate stays closed");
                        return;
                    }
                }
                None if self.shared.gate.is_collecting() => {
                    thread::sleep(Duration::from_millis(1));
                }
                None => return,
            }
        }
    }

    pub fn snapshot(&self) -> InterceptorSnapshot {
        let s = &*self.shared;
        InterceptorSnapshot {
            incoming: s.counters.incoming(),
            finished: s.counters.finished(),
            shed: s.counters.shed(),
            state: s.gate.state(),
            sample_rate: s.sampler.get(),
            threshold: s.heap.threshold(),
            cycles: s.cycles.load(Ordering::SeqCst),
        }
    }

    /// The current cycle's request accounting.
    pub fn counters(&self) -> &CycleCounters {
        &self.shared.counters
    }

    pub fn config(&self) -> &InterceptorConfig {
        &self.shared.config
    }

    pub fn heap_monitor(&self) -> &HeapMonitor<H> {
        &self.shared.heap
    }

    pub fn sampler(&self) -> &Sampler {
        &self.shared.sampler
    }

    pub fn threshold_estimator(&self) -> &ThresholdEstimator {
        &self.shared.threshold
    }

    pub fn unavailability(&self) -> &UnavailabilityEstimator {
        &self.shared.unavailability
    }
}

impl<H: ManagedHeap> Shared<H> {
    fn shed(&self) -> ShedResponse {
        self.counters.record_shed();
        let queue = self.counters.in_flight();
        ShedResponse::shed(self.unavailability.estimate(queue))
    }

    fn spawn_collector(shared: &Arc<Self>) {
        let worker = Arc::clone(shared);
        let spawned = thread::Builder::new()
            .name("gci-collector".to_string())
            .spawn(move || worker.run_cycle());

        match spawned {
            Ok(handle) => {
                *shared.collector.lock() = Some(handle);
            }
            Err(e) => {
                tracing::error!("Interceptor: failed to spawn collector: {}. Reopening gate.", e);
                shared.gate.finish();
            }
        }
    }

    fn run_cycle(&self) {
        self.sampler.update(self.counters.finished());

        let mut totals = self.drain();

        self.unavailability.gc_started();
        let allocated = self.heap.collect();
        self.unavailability.gc_finished();

        // Requests shed while collecting are part of this cycle's cost.
        totals.shed = self.counters.shed();
        let CycleTotals {
            incoming,
            finished: processed,
            shed,
        } = totals;
        self.threshold.update(allocated, processed, shed);
        if self.config.threshold_policy == ThresholdPolicy::Feedback {
            self.heap.install_threshold(self.threshold.get());
        }

        self.counters.retire(totals);
        let cycle = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;

        self.gate.finish();

        if self.config.debug {
            tracing::info!(
                cycle, incoming, processed, shed, allocated,
                threshold = self.heap.threshold(),
                sample_rate = self.sampler.get(),
                "collection cycle complete"
            );
        } else {
            tracing::debug!(
                cycle, incoming, processed, shed, allocated,
                threshold = self.heap.threshold(),
                sample_rate = self.sampler.get(),
                "collection cycle complete"
            );
        }
    }

    /// Waits until every admitted request has called `after` and returns
    /// the counters as they stood at that point.
    ///
    /// No timeout: a request that never calls `after` stalls the cycle.
    fn drain(&self) -> CycleTotals {
        let poll = self.config.drain_poll_interval();
        let mut guard = self.drain_lock.lock();
        loop {
            if let Some(totals) = self.counters.drained() {
                return totals;
            }
            self.drained.wait_for(&mut guard, poll);
        }
    }
}

/// An admitted request. Dropping it reports the request as finished.
pub struct Admission<H: ManagedHeap> {
    interceptor: Interceptor<H>,
    response: Option<ShedResponse>,
}

impl<H: ManagedHeap> Admission<H> {
    pub fn response(&self) -> ShedResponse {
        self.response.unwrap_or_else(|| ShedResponse::shed(Duration::ZERO))
    }

    /// Reports the request as finished now instead of at drop.
    pub fn finish(mut self) {
        if let Some(response) = self.response.take() {
            self.interceptor.after(response);
        }
    }
}

impl<H: ManagedHeap> Drop for Admission<H> {
    fn drop(&mut self) {
        if let Some(response) = self.response.take() {
            self.interceptor.after(response);
        }
    }
}
