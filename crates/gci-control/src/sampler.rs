use gci_core::InterceptorConfig;
use gci_dsa::HistoryWindow;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Decides every how many requests the heap is checked.
///
/// Tracks the smallest recent number of requests between collections, so
/// a burst is never missed, and caps it at `max_rate` to bound the cost of
/// the checks themselves.
pub struct Sampler {
    current: AtomicU64,
    max_rate: u64,
    /// Unfilled slots hold `u64::MAX` and never win the minimum.
    window: Mutex<HistoryWindow<u64>>,
}

impl Sampler {
    pub fn new(history: usize, default_rate: u64, max_rate: u64) -> Self {
        Self {
            current: AtomicU64::new(default_rate.clamp(1, max_rate.max(1))),
            max_rate: max_rate.max(1),
            window: Mutex::new(HistoryWindow::new(history, u64::MAX)),
        }
    }

    pub fn from_config(config: &InterceptorConfig) -> Self {
        Self::new(
            config.sampler_history_size,
            config.default_sample_rate,
            config.max_sample_rate,
        )
    }

    pub fn get(&self) -> u64 {
        self.current.load(Ordering::Acquire)
    }

    pub fn update(&self, finished: u64) {
        // A cycle that finished nothing says nothing about the gap between
        // checks; recording it would pin the interval to the lower bound.
        if finished == 0 {
            return;
        }
        let mut window = self.window.lock();
        window.push(finished);
        let rate = window.min().clamp(1, self.max_rate);
        self.current.store(rate, Ordering::Release);
    }
}
