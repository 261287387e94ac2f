//! # warden-stream
//!
//! Supervision of streaming upstream model calls.
//!
//! - [`phase`]: the per-attempt phase state machine and its timeouts
//! - [`retry`]: retry budgets and backoff schedules
//! - [`upstream`]: the `Upstream` seam and failure classification
//! - [`supervisor`]: `StreamSupervisor`, which ties them together and
//!   keeps every wait cancellable

pub mod phase;
pub mod retry;
pub mod supervisor;
pub mod upstream;

pub use phase::{PhaseEvent, PhaseTracker, StreamTimeouts};
pub use retry::RetryPolicy;
pub use supervisor::{StreamOutcome, StreamSupervisor};
pub use upstream::{StreamEvent, Upstream, UpstreamError, UpstreamErrorKind, UpstreamStream};
