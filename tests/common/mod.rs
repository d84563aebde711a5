#![allow(dead_code)]

use gc_interceptor::ManagedHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A runtime whose heap size is set by the test. A collection zeroes it.
#[derive(Default)]
pub struct ScriptedHeap {
    alloc: AtomicU64,
    collections: AtomicUsize,
    in_collect: AtomicUsize,
    max_concurrent: AtomicUsize,
    collect_delay_ms: AtomicU64,
    auto_disabled: AtomicBool,
    on_collect: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl ScriptedHeap {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_alloc(&self, bytes: u64) {
        self.alloc.store(bytes, Ordering::SeqCst);
    }

    pub fn set_collect_delay(&self, delay: Duration) {
        self.collect_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Runs `hook` once, inside the next collection.
    pub fn set_on_collect<F: FnOnce() + Send + 'static>(&self, hook: F) {
        *self.on_collect.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn collections(&self) -> usize {
        self.collections.load(Ordering::SeqCst)
    }

    pub fn max_concurrent_collections(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }

    pub fn auto_disabled(&self) -> bool {
        self.auto_disabled.load(Ordering::SeqCst)
    }
}

impl ManagedHeap for ScriptedHeap {
    fn heap_allocated(&self) -> u64 {
        self.alloc.load(Ordering::SeqCst)
    }

    fn collect(&self) {
        let now = self.in_collect.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(now, Ordering::SeqCst);

        let hook = self.on_collect.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }

        let delay = self.collect_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        self.alloc.store(0, Ordering::SeqCst);
        self.collections.fetch_add(1, Ordering::SeqCst);
        self.in_collect.fetch_sub(1, Ordering::SeqCst);
    }

    fn disable_automatic_collection(&self) {
        self.auto_disabled.store(true, Ordering::SeqCst);
    }
}

/// Pressure is reported on every check: the heap is far above any
/// threshold the config allows.
pub const HUGE_ALLOC: u64 = 1 << 40;
