use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

/// A fixed-size circular history of recent samples.
///
/// Every estimator in the control loop keeps a short history of what it
/// observed in the last few collection cycles and aggregates it with a
/// max or a min. Arrival rate and per-request cost drift over time, so the
/// window is deliberately small: a long history does not improve the
/// decision.
///
/// ## Mechanical Sympathy
/// The backing storage is allocated once at construction. `push` is an
/// O(1) overwrite of the oldest slot and never reallocates.
#[derive(Clone, PartialEq, Eq)]
pub struct HistoryWindow<T> {
    slots: Vec<T>,
    next: usize,
}

impl<T: Copy> HistoryWindow<T> {
    /// Creates a window of `size` slots, every slot holding `fill`.
    pub fn new(size: usize, fill: T) -> Self {
        assert!(size > 0, "HistoryWindow size must be positive");
        Self {
            slots: vec![fill; size],
            next: 0,
        }
    }

    /// Overwrites the oldest slot with `value` and advances the cursor.
    pub fn push(&mut self, value: T) {
        self.slots[self.next] = value;
        self.next = (self.next + 1) % self.slots.len();
    }

    /// Index of the slot the next `push` overwrites.
    pub fn next_index(&self) -> usize {
        self.next
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slots in storage order (not insertion order).
    pub fn as_slice(&self) -> &[T] {
        &self.slots
    }
}

impl<T: Copy + Ord> HistoryWindow<T> {
    /// Largest value currently held.
    pub fn max(&self) -> T {
        let mut max = self.slots[0];
        for &v in &self.slots[1..] {
            if v > max {
                max = v;
            }
        }
        max
    }

    /// Smallest value currently held.
    pub fn min(&self) -> T {
        let mut min = self.slots[0];
        for &v in &self.slots[1..] {
            if v < min {
                min = v;
            }
        }
        min
    }
}

impl<T: fmt::Debug> fmt::Debug for HistoryWindow<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoryWindow")
            .field("slots", &self.slots)
            .field("next", &self.next)
            .finish()
    }
}

static_assertions::assert_impl_all!(HistoryWindow<u64>: Send, Sync, Clone);
