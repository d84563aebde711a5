//! # gci-control: the admission control loop
//!
//! `Interceptor` is the only type most callers need. The estimators are
//! public so they can be driven and inspected on their own.

mod sync;

pub mod counters;
pub mod gate;
pub mod heap;
pub mod interceptor;
pub mod sampler;
pub mod threshold;
pub mod unavailability;

pub use counters::{CycleCounters, CycleTotals};
pub use gate::{AdmissionGate, CollectorState};
pub use heap::HeapMonitor;
pub use interceptor::{Admission, Interceptor, InterceptorBuilder, InterceptorSnapshot};
pub use sampler::Sampler;
pub use threshold::ThresholdEstimator;
pub use unavailability::UnavailabilityEstimator;
