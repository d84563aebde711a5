use std::sync::atomic::{AtomicU64, Ordering};

/// Counter values the collector observed once the drain completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CycleTotals {
    pub incoming: u64,
    pub finished: u64,
    pub shed: u64,
}

/// Per-cycle request accounting shared by request threads and the collector.
///
/// ## Invariant
/// A cycle is closed with `retire`, which subtracts exactly what the drain
/// observed. Increments that land between the drain and the reset carry
/// over into the next cycle instead of being zeroed away, so every admitted
/// request is matched by exactly one `finish` in the same books.
#[derive(Debug, Default)]
pub struct CycleCounters {
    incoming: AtomicU64,
    finished: AtomicU64,
    shed: AtomicU64,
}

impl CycleCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts an arrival and returns the arrival's position in the cycle.
    pub fn arrive(&self) -> u64 {
        self.incoming.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Takes back the caller's own `arrive`.
    pub fn withdraw(&self) {
        saturating_sub(&self.incoming, 1);
    }

    pub fn finish(&self) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_shed(&self) {
        self.shed.fetch_add(1, Ordering::SeqCst);
    }

    /// Admitted requests that have not called `after` yet.
    pub fn in_flight(&self) -> u64 {
        self.incoming()
            .saturating_sub(self.finished.load(Ordering::SeqCst))
    }

    pub fn incoming(&self) -> u64 {
        self.incoming.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> u64 {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn shed(&self) -> u64 {
        self.shed.load(Ordering::SeqCst)
    }

    /// Returns the totals if every counted arrival has finished.
    ///
    /// `finished` is read before `incoming`: any finish it includes belongs
    /// to an arrival already visible in the `incoming` read that follows.
    pub fn drained(&self) -> Option<CycleTotals> {
        let finished = self.finished.load(Ordering::SeqCst);
        let incoming = self.incoming.load(Ordering::SeqCst);
        if finished < incoming {
            return None;
        }
        Some(CycleTotals {
            incoming,
            finished,
            shed: self.shed.load(Ordering::SeqCst),
        })
    }

    /// Subtracts a closed cycle's totals, keeping anything counted since.
    pub fn retire(&self, totals: CycleTotals) {
        saturating_sub(&self.incoming, totals.incoming);
        saturating_sub(&self.finished, totals.finished);
        saturating_sub(&self.shed, totals.shed);
    }
}

fn saturating_sub(counter: &AtomicU64, n: u64) {
    let _ = counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
        Some(v.saturating_sub(n))
    });
}
