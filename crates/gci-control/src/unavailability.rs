use gci_core::{Clock, InterceptorConfig};
use gci_dsa::HistoryWindow;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Single-pass mean/variance accumulator (Welford).
///
/// Numerically stable: no sum of squares, so no catastrophic cancellation
/// when durations are large and close together.
#[derive(Debug, Default, Clone, Copy)]
struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
}

impl RunningStats {
    fn push(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
    }

    fn std_dev(&self) -> f64 {
        if self.count > 1 {
            (self.m2 / (self.count - 1) as f64).sqrt()
        } else {
            0.0
        }
    }

    /// `mean + 3 sigma` in nanoseconds: covers ~99.7% of the observed
    /// durations under a roughly normal distribution.
    fn upper_estimate(&self) -> u64 {
        (self.mean + 3.0 * self.std_dev()).max(0.0) as u64
    }
}

struct EstimatorState {
    gc_past: HistoryWindow<u64>,
    req_past: HistoryWindow<u64>,
    gc_estimation: u64,
    req_estimation: u64,
    gc_start: Option<Instant>,
    collections: u64,
    cycle: RunningStats,
}

/// Predicts how long a shed caller should wait before retrying.
///
/// Both the collection-duration and per-request-duration estimates are the
/// maximum over a short window: the worst recent pause is assumed to recur.
///
/// ## Concurrency
/// `request_finished` is called by every admitted request and is a
/// multi-step read-modify-write, so all state sits behind one mutex.
pub struct UnavailabilityEstimator {
    clock: Arc<dyn Clock>,
    /// Stands in for the collection estimate until one has been measured.
    initial: Duration,
    state: Mutex<EstimatorState>,
}

impl UnavailabilityEstimator {
    pub fn new(history: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            initial: Duration::ZERO,
            state: Mutex::new(EstimatorState {
                gc_past: HistoryWindow::new(history, 0),
                req_past: HistoryWindow::new(history, 0),
                gc_estimation: 0,
                req_estimation: 0,
                gc_start: None,
                collections: 0,
                cycle: RunningStats::default(),
            }),
        }
    }

    pub fn from_config(config: &InterceptorConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(config.unavailability_history_size, clock)
            .with_initial_estimate(config.initial_unavailability())
    }

    /// Sets the collection estimate used before any collection finished.
    pub fn with_initial_estimate(mut self, initial: Duration) -> Self {
        self.initial = initial;
        self
    }

    pub fn gc_started(&self) {
        let now = self.clock.now();
        self.state.lock().gc_start = Some(now);
    }

    /// Closes the collection opened by `gc_started`. Ignored without one.
    pub fn gc_finished(&self) {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let Some(start) = state.gc_start.take() else {
            tracing::warn!("UnavailabilityEstimator: gc_finished without gc_started");
            return;
        };

        let gc_nanos = now.saturating_duration_since(start).as_nanos() as u64;
        state.gc_past.push(gc_nanos);
        state.gc_estimation = state.gc_past.max();
        state.collections += 1;

        let req_nanos = state.cycle.upper_estimate();
        state.req_past.push(req_nanos);
        state.req_estimation = state.req_past.max();

        state.cycle = RunningStats::default();
    }

    pub fn request_finished(&self, took: Duration) {
        self.state.lock().cycle.push(took.as_nanos() as f64);
    }

    /// Time until the service is expected to admit again, given
    /// `queue_depth` admitted requests still ahead of the collection.
    pub fn estimate(&self, queue_depth: u64) -> Duration {
        let now = self.clock.now();
        let state = self.state.lock();

        let trailing = if queue_depth > 0 {
            let per_request = match state.req_estimation {
                // No collection has finished yet.
                0 => state.cycle.upper_estimate(),
                est => est,
            };
            queue_depth.saturating_mul(per_request)
        } else {
            0
        };

        let gc = match state.collections {
            0 => self.initial.as_nanos() as u64,
            _ => state.gc_estimation,
        };
        let total = Duration::from_nanos(gc.saturating_add(trailing));
        match state.gc_start {
            Some(start) => total.saturating_sub(now.saturating_duration_since(start)),
            None => total,
        }
    }

    /// Current collection-duration estimate.
    pub fn gc_estimation(&self) -> Duration {
        Duration::from_nanos(self.state.lock().gc_estimation)
    }

    /// Current per-request duration estimate.
    pub fn request_estimation(&self) -> Duration {
        Duration::from_nanos(self.state.lock().req_estimation)
    }
}
