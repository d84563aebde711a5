//! # gc-interceptor
//!
//! Admission control for services on a garbage-collected runtime: the
//! runtime's automatic collection is switched off, heap pressure is
//! sampled per request, and collections run only after in-flight requests
//! drained, while newcomers are shed with a retry hint.
//!
//! ```ignore
//! let interceptor = Interceptor::new(InterceptorConfig::default(), heap)?;
//! let response = interceptor.before();
//! if !response.should_shed {
//!     handle_request();
//!     interceptor.after(response);
//! }
//! ```

pub use gci_control::{
    Admission, AdmissionGate, CollectorState, CycleCounters, CycleTotals, HeapMonitor,
    Interceptor, InterceptorBuilder, InterceptorSnapshot, Sampler, ThresholdEstimator,
    UnavailabilityEstimator,
};
pub use gci_core::{
    AccountedHeap, Clock, GciError, InterceptorConfig, ManagedHeap, ManualClock, Result,
    ShedResponse, SystemClock, ThresholdPolicy,
};
pub use gci_http::{GciLayer, GciService};

