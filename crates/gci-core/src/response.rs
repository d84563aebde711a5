use std::time::{Duration, Instant};

/// The verdict `Interceptor::before` hands to a single request.
///
/// Ephemeral: produced by `before`, consumed by `after`, never shared
/// between requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShedResponse {
    /// The request must be rejected instead of processed.
    pub should_shed: bool,
    /// How long a shed caller should wait before retrying.
    pub unavailability: Duration,
    start: Option<Instant>,
}

impl ShedResponse {
    pub fn shed(unavailability: Duration) -> Self {
        Self {
            should_shed: true,
            unavailability,
            start: None,
        }
    }

    pub fn admitted(start: Instant) -> Self {
        Self {
            should_shed: false,
            unavailability: Duration::ZERO,
            start: Some(start),
        }
    }

    /// When processing of an admitted request began.
    pub fn started_at(&self) -> Option<Instant> {
        self.start
    }
}
