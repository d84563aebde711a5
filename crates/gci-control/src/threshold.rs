//! # Shedding Threshold
//!
//! The threshold is the heap growth at which a collection is scheduled.
//! Each cycle it moves toward the growth actually observed, down when the
//! cycle shed more than tolerated and up otherwise. The tolerated shed
//! ratio itself decays exponentially with the number of cycles seen:
//!
//! $max\_overhead = start \cdot e^{-smooth \cdot cycles}$
//!
//! so the controller accepts noisy shedding while it learns and converges
//! to a near-zero shed fraction once it has settled.

use gci_core::InterceptorConfig;
use rand::Rng;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

pub struct ThresholdEstimator {
    value: AtomicU64,
    cycles_seen: AtomicU32,
    min: u64,
    max: u64,
    start_max_overhead: f64,
    smooth_factor: f64,
    max_cycles: u32,
}

impl ThresholdEstimator {
    /// Starts at a value jittered in `[min, 2*min]`.
    pub fn new(config: &InterceptorConfig) -> Self {
        let min = config.min_shedding_threshold;
        Self::with_value(config, min + jitter(min))
    }

    pub fn with_value(config: &InterceptorConfig, value: u64) -> Self {
        Self {
            value: AtomicU64::new(value),
            cycles_seen: AtomicU32::new(0),
            min: config.min_shedding_threshold,
            max: config.max_shedding_threshold,
            start_max_overhead: config.start_max_overhead,
            smooth_factor: config.smooth_factor,
            max_cycles: config.max_cycles,
        }
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    pub fn cycles_seen(&self) -> u32 {
        self.cycles_seen.load(Ordering::Acquire)
    }

    /// Shed/processed ratio tolerated by the next `update`.
    pub fn max_overhead(&self) -> f64 {
        self.start_max_overhead * (-self.smooth_factor * self.cycles_seen() as f64).exp()
    }

    /// Folds one finished cycle into the threshold.
    ///
    /// Single writer: only the background collection task calls this.
    pub fn update(&self, allocated: u64, processed: u64, shed: u64) {
        let max_overhead = self.max_overhead();
        let cycles = self.cycles_seen();
        self.cycles_seen
            .store((cycles + 1).min(self.max_cycles), Ordering::Release);

        let ratio = match (shed, processed) {
            (0, _) => 0.0,
            (_, 0) => f64::INFINITY,
            (s, p) => s as f64 / p as f64,
        };

        let mut candidate = if ratio > max_overhead {
            allocated.saturating_sub(jitter(self.min))
        } else {
            allocated.saturating_add(jitter(self.min))
        };

        // Re-jitter inside the bound instead of pinning to it, so the
        // threshold cannot get stuck oscillating at an edge.
        if candidate <= self.min {
            candidate = self.min + jitter(self.min);
        } else if candidate >= self.max {
            candidate = self.max.saturating_sub(jitter(self.min));
        }
        self.value.store(candidate, Ordering::Release);
    }
}

fn jitter(span: u64) -> u64 {
    rand::thread_rng().gen_range(0..=span)
}
