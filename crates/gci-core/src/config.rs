use serde::Deserialize;
use std::time::Duration;

use crate::error::{GciError, Result};

const MIB: u64 = 1024 * 1024;

/// Which value the heap-pressure check compares against.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdPolicy {
    /// Threshold follows the shed-ratio feedback of `ThresholdEstimator`.
    #[default]
    Feedback,
    /// Threshold is the bounded maximum of the recent heap-growth window.
    WindowMax,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct InterceptorConfig {
    /// Lower bound of the shedding threshold, in bytes. Also the jitter span.
    pub min_shedding_threshold: u64,
    /// Upper bound of the shedding threshold, in bytes.
    pub max_shedding_threshold: u64,
    /// Tolerated shed/processed ratio at the first cycle.
    pub start_max_overhead: f64,
    /// Decay rate of the tolerated overhead per cycle.
    pub smooth_factor: f64,
    /// Cycle count at which the overhead decay stops.
    pub max_cycles: u32,
    pub heap_history_size: usize,
    pub sampler_history_size: usize,
    /// Requests between heap checks until the first cycle completes.
    pub default_sample_rate: u64,
    pub max_sample_rate: u64,
    pub unavailability_history_size: usize,
    /// Retry hint for requests shed before the first collection completes.
    pub initial_unavailability_ms: u64,
    /// Re-check period of the drain wait.
    pub drain_poll_interval_ms: u64,
    pub threshold_policy: ThresholdPolicy,
    /// Log a per-cycle summary at `info` instead of `debug`.
    pub debug: bool,
}

impl Default for InterceptorConfig {
    fn default() -> Self {
        Self {
            min_shedding_threshold: 32 * MIB,
            max_shedding_threshold: 512 * MIB,
            start_max_overhead: 0.1,
            smooth_factor: 0.2,
            max_cycles: 23,
            heap_history_size: 5,
            sampler_history_size: 5,
            default_sample_rate: 10,
            max_sample_rate: 30,
            unavailability_history_size: 5,
            initial_unavailability_ms: 1000,
            drain_poll_interval_ms: 10,
            threshold_policy: ThresholdPolicy::Feedback,
            debug: false,
        }
    }
}

impl InterceptorConfig {
    /// Parses a TOML document; absent keys keep their defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn drain_poll_interval(&self) -> Duration {
        Duration::from_millis(self.drain_poll_interval_ms)
    }

    pub fn initial_unavailability(&self) -> Duration {
        Duration::from_millis(self.initial_unavailability_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_shedding_threshold == 0 {
            return Err(invalid("min_shedding_threshold must be positive"));
        }
        // Re-jittering a low candidate lands in [min, 2*min]; it has to fit.
        if self.max_shedding_threshold < self.min_shedding_threshold.saturating_mul(2) {
            return Err(invalid(
                "max_shedding_threshold must be at least twice min_shedding_threshold",
            ));
        }
        if !(self.start_max_overhead > 0.0 && self.start_max_overhead <= 1.0) {
            return Err(invalid("start_max_overhead must be in (0, 1]"));
        }
        if !(self.smooth_factor >= 0.0 && self.smooth_factor.is_finite()) {
            return Err(invalid("smooth_factor must be a non-negative number"));
        }
        if self.heap_history_size == 0
            || self.sampler_history_size == 0
            || self.unavailability_history_size == 0
        {
            return Err(invalid("history sizes must be positive"));
        }
        if self.default_sample_rate == 0 || self.default_sample_rate > self.max_sample_rate {
            return Err(invalid(
                "default_sample_rate must be in [1, max_sample_rate]",
            ));
        }
        if self.initial_unavailability_ms == 0 {
            return Err(invalid("initial_unavailability_ms must be positive"));
        }
        if self.drain_poll_interval_ms == 0 {
            return Err(invalid("drain_poll_interval_ms must be positive"));
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> GciError {
    GciError::InvalidConfig(msg.to_string())
}
