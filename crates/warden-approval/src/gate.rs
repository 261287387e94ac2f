//! The tool-side entry point for human approval.
//!
//! `ApprovalGate::request` is what a tool call flagged `Confirm` waits on.
//! It always ends in a decision: anything other than an explicit approval
//! within the deadline comes back as `Denied` or `TimedOut`.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use warden_contracts::{
    approval::ApprovalOutcome,
    error::{WardenError, WardenResult},
};

use crate::broker::ApprovalBroker;
use crate::observer::ApprovalObserver;

/// Couples the shared broker with the observer that surfaces requests.
#[derive(Clone)]
pub struct ApprovalGate {
    broker: Arc<ApprovalBroker>,
    observer: Option<Arc<dyn ApprovalObserver>>,
}

impl ApprovalGate {
    pub fn new(broker: Arc<ApprovalBroker>, observer: Arc<dyn ApprovalObserver>) -> Self {
        Self {
            broker,
            observer: Some(observer),
        }
    }

    /// A gate with nobody to ask. Every request is denied at once.
    pub fn headless(broker: Arc<ApprovalBroker>) -> Self {
        Self {
            broker,
            observer: None,
        }
    }

    pub fn broker(&self) -> &Arc<ApprovalBroker> {
        &self.broker
    }

    /// Ask for approval of the operation described by `description`.
    ///
    /// # Errors
    ///
    /// - `CapacityExceeded` if the broker is full (the call must not run)
    /// - `Cancelled` if `cancel` fires while waiting; the pending entry is
    ///   discarded so a late response finds nothing
    pub async fn request(
        &self,
        description: &str,
        cancel: &CancellationToken,
    ) -> WardenResult<ApprovalOutcome> {
        let Some(observer) = &self.observer else {
            info!(description, "no approval observer attached, denying");
            return Ok(ApprovalOutcome::Denied);
        };

        let ticket = self.broker.create(description)?;
        let id = ticket.id().clone();

        if !observer.notify(ticket.request()) {
            warn!(approval_id = %id, "approval request could not be delivered, denying");
            self.broker.discard(&id);
            return Ok(ApprovalOutcome::Denied);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.broker.discard(&id);
                info!(approval_id = %id, "approval wait cancelled, request discarded");
                Err(WardenError::Cancelled)
            }
            outcome = self.broker.await_result(ticket) => Ok(outcome),
        }
    }
}

impl std::fmt::Debug for ApprovalGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalGate")
            .field("pending", &self.broker.len())
            .field("headless", &self.observer.is_none())
            .finish()
    }
}
