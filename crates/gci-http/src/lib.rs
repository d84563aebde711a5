//! # gci-http: Transport Adapter
//!
//! Maps the interceptor's two-call contract onto HTTP. Wrap the service
//! chain with `GciLayer` as its outermost layer:
//!
//! - shed requests get `503 Service Unavailable` with a `Retry-After`
//!   header carrying the unavailability hint in whole seconds;
//! - admitted requests reach the inner service, and the interceptor is
//!   told they finished when the response future completes, fails or is
//!   dropped;
//! - the `gci` control header answers the current heap size (`ch`) or
//!   starts a collection cycle (any other value).

pub mod service;

pub use service::{GciLayer, GciService, ResponseFuture, CONTROL_HEADER, HEAP_CHECK};
