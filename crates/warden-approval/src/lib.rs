//! # warden-approval
//!
//! Human-in-the-loop approval for tool calls the policy engine flags as
//! `Confirm`.
//!
//! - [`broker`]: the pending-approval store with exactly-once resolution
//! - [`observer`]: how new requests reach a UI
//! - [`gate`]: `ApprovalGate`, the fail-closed wait used by the agent loop
//! - [`http`]: the axum router clients answer through
//!
//! Every path that does not end in an explicit approval before the deadline
//! ends in denial.

pub mod broker;
pub mod gate;
pub mod http;
pub mod observer;

pub use broker::{ApprovalBroker, ApprovalTicket, PendingSummary, DEFAULT_APPROVAL_TIMEOUT, DEFAULT_CAPACITY};
pub use gate::ApprovalGate;
pub use observer::{ApprovalObserver, BroadcastObserver};
