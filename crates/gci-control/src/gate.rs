use crate::sync::{AtomicU8, Ordering};

const IDLE: u8 = 0;
const COLLECTING: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorState {
    Idle,
    Collecting,
}

/// Single-admission gate in front of the background collection task.
///
/// ## Invariant
/// Idle -> Collecting is one compare-and-swap, so among any number of
/// racing callers exactly one wins per cycle. Only the winner's task may
/// call `finish`.
pub struct AdmissionGate {
    state: AtomicU8,
}

impl AdmissionGate {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(IDLE),
        }
    }

    pub fn state(&self) -> CollectorState {
        match self.state.load(Ordering::SeqCst) {
            IDLE => CollectorState::Idle,
            _ => CollectorState::Collecting,
        }
    }

    pub fn is_collecting(&self) -> bool {
        self.state.load(Ordering::SeqCst) == COLLECTING
    }

    /// Returns `true` if the caller now owns the collection cycle.
    pub fn try_begin(&self) -> bool {
        self.state
            .compare_exchange(IDLE, COLLECTING, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn finish(&self) {
        self.state.store(IDLE, Ordering::SeqCst);
    }
}

impl Default for AdmissionGate {
    fn default() -> Self {
        Self::new()
    }
}
