pub mod clock;
pub mod config;
pub mod error;
pub mod response;
pub mod runtime;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{InterceptorConfig, ThresholdPolicy};
pub use error::{GciError, Result};
pub use response::ShedResponse;
pub use runtime::{AccountedHeap, ManagedHeap};
