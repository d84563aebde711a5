//! # gci-core: Runtime Collaborator
//!
//! The control loop never talks to a concrete garbage collector. It sees
//! the narrow `ManagedHeap` capability surface: how many bytes are
//! allocated right now, and "collect, and block until done".

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// The capability surface of a garbage-collected runtime.
pub trait ManagedHeap: Send + Sync + 'static {
    /// Bytes of allocated heap objects, reachable or not yet reclaimed.
    fn heap_allocated(&self) -> u64;

    /// Runs a full collection and blocks the caller until it completes.
    /// May transiently block every other thread of the runtime.
    fn collect(&self);

    /// Stops the runtime from scheduling collections on its own.
    /// Process-wide and never reverted by the interceptor.
    fn disable_automatic_collection(&self) {}
}

impl<H: ManagedHeap> ManagedHeap for Arc<H> {
    fn heap_allocated(&self) -> u64 {
        (**self).heap_allocated()
    }

    fn collect(&self) {
        (**self).collect()
    }

    fn disable_automatic_collection(&self) {
        (**self).disable_automatic_collection()
    }
}

type Reclaimer = Box<dyn FnMut() -> u64 + Send>;

/// An allocation-accounting heap for embedders that manage their own
/// garbage (arenas, deferred-free lists, caches of dead objects).
///
/// The embedder reports allocations through `record_allocation` and
/// registers reclaimers that free garbage and return the number of bytes
/// they released. With an automatic budget set, crossing it runs an
/// implicit collection on the allocating thread, which is exactly what the
/// interceptor switches off.
///
/// Reclaimers run under an internal lock and must not call back into the
/// heap that owns them.
pub struct AccountedHeap {
    allocated: AtomicU64,
    /// 0 = automatic collection disabled.
    auto_budget: AtomicU64,
    collections: AtomicU64,
    reclaimers: Mutex<Vec<Reclaimer>>,
}

impl AccountedHeap {
    pub fn new() -> Self {
        Self {
            allocated: AtomicU64::new(0),
            auto_budget: AtomicU64::new(0),
            collections: AtomicU64::new(0),
            reclaimers: Mutex::new(Vec::new()),
        }
    }

    /// Enables implicit collections whenever `budget` bytes are allocated.
    pub fn with_automatic_collection(self, budget: u64) -> Self {
        self.auto_budget.store(budget, Ordering::Release);
        self
    }

    pub fn register_reclaimer<F>(&self, reclaimer: F)
    where
        F: FnMut() -> u64 + Send + 'static,
    {
        self.reclaimers.lock().push(Box::new(reclaimer));
    }

    pub fn record_allocation(&self, bytes: u64) {
        let total = self.allocated.fetch_add(bytes, Ordering::AcqRel) + bytes;
        let budget = self.auto_budget.load(Ordering::Acquire);
        if budget > 0 && total >= budget {
            tracing::trace!("AccountedHeap: implicit collection at {} bytes", total);
            self.collect();
        }
    }

    pub fn automatic_collection_enabled(&self) -> bool {
        self.auto_budget.load(Ordering::Acquire) > 0
    }

    /// Number of collections run so far, implicit ones included.
    pub fn collections(&self) -> u64 {
        self.collections.load(Ordering::Acquire)
    }
}

impl Default for AccountedHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl ManagedHeap for AccountedHeap {
    fn heap_allocated(&self) -> u64 {
        self.allocated.load(Ordering::Acquire)
    }

    fn collect(&self) {
        let mut reclaimers = self.reclaimers.lock();
        let freed: u64 = reclaimers.iter_mut().map(|reclaim| reclaim()).sum();
        drop(reclaimers);

        let _ = self
            .allocated
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_sub(freed))
            });
        self.collections.fetch_add(1, Ordering::AcqRel);
    }

    fn disable_automatic_collection(&self) {
        self.auto_budget.store(0, Ordering::Release);
        tracing::info!("AccountedHeap: automatic collection disabled");
    }
}
