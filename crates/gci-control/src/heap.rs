use gci_core::{InterceptorConfig, ManagedHeap};
use gci_dsa::HistoryWindow;
use parking_lot::Mutex;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};

/// Watches heap growth since the last collection and forces collections.
///
/// ## Concurrency
/// `should_collect` is called by many request threads at once and only
/// touches atomics. `collect` is called by the single background task of a
/// cycle; the window lock is never contended on the request path.
pub struct HeapMonitor<H> {
    heap: H,
    threshold: AtomicU64,
    max_threshold: u64,
    /// Heap size right after the last collection.
    clean_slate: AtomicU64,
    /// Growth seen by the most recent check.
    last_used: AtomicU64,
    window: Mutex<HistoryWindow<u64>>,
}

impl<H: ManagedHeap> HeapMonitor<H> {
    /// Builds a monitor whose first threshold is jittered in `[min, 2*min]`,
    /// so co-deployed instances do not all collect at the same moment.
    pub fn new(heap: H, config: &InterceptorConfig) -> Self {
        let min = config.min_shedding_threshold;
        let initial = min + rand::thread_rng().gen_range(0..=min);
        Self::with_threshold(
            heap,
            config.heap_history_size,
            initial,
            config.max_shedding_threshold,
        )
    }

    pub fn with_threshold(heap: H, history: usize, threshold: u64, max_threshold: u64) -> Self {
        let clean_slate = heap.heap_allocated();
        Self {
            heap,
            threshold: AtomicU64::new(threshold),
            max_threshold,
            clean_slate: AtomicU64::new(clean_slate),
            last_used: AtomicU64::new(0),
            window: Mutex::new(HistoryWindow::new(history, 0)),
        }
    }

    /// Bytes allocated since the last collection.
    pub fn allocated_since_collection(&self) -> u64 {
        self.heap
            .heap_allocated()
            .saturating_sub(self.clean_slate.load(Ordering::Acquire))
    }

    pub fn should_collect(&self) -> bool {
        let used = self.allocated_since_collection();
        self.last_used.store(used, Ordering::Release);
        used >= self.threshold.load(Ordering::Acquire)
    }

    /// Forces a full collection and folds the growth that led to it into
    /// the window. Returns that growth in bytes.
    ///
    /// Blocks the caller for the duration of the collection.
    pub fn collect(&self) -> u64 {
        let used = self.allocated_since_collection();
        self.last_used.store(used, Ordering::Release);

        self.heap.collect();
        self.clean_slate
            .store(self.heap.heap_allocated(), Ordering::Release);

        let mut window = self.window.lock();
        window.push(used);
        let bounded = window.max().min(self.max_threshold);
        self.threshold.store(bounded, Ordering::Release);

        tracing::trace!("HeapMonitor: window {:?}, threshold {}", window.as_slice(), bounded);
        used
    }

    pub fn threshold(&self) -> u64 {
        self.threshold.load(Ordering::Acquire)
    }

    /// Replaces the value `should_collect` compares against.
    pub fn install_threshold(&self, threshold: u64) {
        self.threshold.store(threshold, Ordering::Release);
    }

    pub fn last_observed(&self) -> u64 {
        self.last_used.load(Ordering::Acquire)
    }

    /// Window slots in storage order.
    pub fn window(&self) -> Vec<u64> {
        self.window.lock().as_slice().to_vec()
    }

    pub fn heap(&self) -> &H {
        &self.heap
    }
}
