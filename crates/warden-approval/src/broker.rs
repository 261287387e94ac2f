//! The pending-approval store.
//!
//! `ApprovalBroker` owns every outstanding approval from creation until it is
//! resolved, times out, or is discarded. The map is only reachable through
//! the operations below, and each of them runs under a single lock
//! acquisition, so a removal and the wakeup it triggers are one step.
//!
//! The waiter side of each approval lives in the `ApprovalTicket` returned by
//! `create`. A decision delivered before the caller starts waiting is held in
//! the ticket's channel, so there is no lost wakeup. Once the ticket is gone
//! there is no waiting execution path and `resolve` reports `NotFound`.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use warden_contracts::{
    approval::{ApprovalId, ApprovalOutcome, ApprovalRequest},
    error::{WardenError, WardenResult},
};

/// Maximum number of simultaneously pending approvals.
pub const DEFAULT_CAPACITY: usize = 100;

/// Deadline applied to each approval unless configured otherwise.
pub const DEFAULT_APPROVAL_TIMEOUT: Duration = Duration::from_secs(120);

struct PendingApproval {
    description: String,
    created_at: DateTime<Utc>,
    deadline: Instant,
    responder: oneshot::Sender<bool>,
}

/// The waiting half of one approval. Consumed by `ApprovalBroker::await_result`.
#[derive(Debug)]
pub struct ApprovalTicket {
    request: ApprovalRequest,
    deadline: Instant,
    waiter: oneshot::Receiver<bool>,
}

impl ApprovalTicket {
    pub fn id(&self) -> &ApprovalId {
        &self.request.approval_id
    }

    /// The event to surface to the external observer.
    pub fn request(&self) -> &ApprovalRequest {
        &self.request
    }
}

/// A read-only view of one pending approval.
#[derive(Debug, Clone, Serialize)]
pub struct PendingSummary {
    pub approval_id: ApprovalId,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub seconds_remaining: u64,
}

/// Holds outstanding approval requests keyed by id.
///
/// Construct one broker at process start and share it behind an `Arc`.
pub struct ApprovalBroker {
    timeout: Duration,
    capacity: usize,
    pending: Mutex<HashMap<ApprovalId, PendingApproval>>,
}

impl ApprovalBroker {
    /// Create a broker whose approvals expire after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self::with_capacity(timeout, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(timeout: Duration, capacity: usize) -> Self {
        Self {
            timeout,
            capacity,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    // Entries are inserted and removed whole, so a poisoned guard still
    // protects a consistent map.
    fn lock(&self) -> MutexGuard<'_, HashMap<ApprovalId, PendingApproval>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new pending approval.
    ///
    /// Expired entries are swept first. A store that is still full rejects
    /// the request with `CapacityExceeded`; live entries are never evicted.
    pub fn create(&self, description: impl Into<String>) -> WardenResult<ApprovalTicket> {
        let now = Instant::now();
        let mut pending = self.lock();
        pending.retain(|_, entry| entry.deadline > now);

        if pending.len() >= self.capacity {
            warn!(
                capacity = self.capacity,
                "approval store full, rejecting new request"
            );
            return Err(WardenError::CapacityExceeded {
                capacity: self.capacity,
            });
        }

        let approval_id = loop {
            let candidate = ApprovalId::generate();
            if !pending.contains_key(&candidate) {
                break candidate;
            }
        };

        let description = description.into();
        let created_at = Utc::now();
        let deadline = now + self.timeout;
        let (responder, waiter) = oneshot::channel();

        pending.insert(
            approval_id.clone(),
            PendingApproval {
                description: description.clone(),
                created_at,
                deadline,
                responder,
            },
        );

        debug!(
            approval_id = %approval_id,
            timeout_secs = self.timeout.as_secs(),
            pending = pending.len(),
            "approval created"
        );

        let deadline_utc = created_at
            + chrono::Duration::milliseconds(i64::try_from(self.timeout.as_millis()).unwrap_or(i64::MAX));
        Ok(ApprovalTicket {
            request: ApprovalRequest {
                approval_id,
                description,
                created_at,
                deadline: deadline_utc,
            },
            deadline,
            waiter,
        })
    }

    /// Wait for a decision on `ticket` until its deadline.
    ///
    /// On timeout the entry is removed, so any later `resolve` for the same
    /// id returns `NotFound`.
    pub async fn await_result(&self, ticket: ApprovalTicket) -> ApprovalOutcome {
        let ApprovalTicket {
            request,
            deadline,
            mut waiter,
        } = ticket;
        let id = request.approval_id;

        match tokio::time::timeout_at(deadline, &mut waiter).await {
            Ok(Ok(approved)) => decision(approved),
            // Responder dropped without a decision: the entry was discarded.
            Ok(Err(_)) => ApprovalOutcome::Denied,
            Err(_) => {
                let mut pending = self.lock();
                if pending.remove(&id).is_some() {
                    info!(approval_id = %id, "approval timed out, failing closed");
                    return ApprovalOutcome::TimedOut;
                }
                drop(pending);
                // A resolver removed the entry and sent before we re-locked.
                match waiter.try_recv() {
                    Ok(approved) => decision(approved),
                    Err(_) => ApprovalOutcome::Denied,
                }
            }
        }
    }

    /// Deliver a decision for the approval identified by `raw_id`.
    ///
    /// Removal and wakeup happen under one lock acquisition: of two racing
    /// resolutions exactly one succeeds and the other sees `NotFound`.
    /// Malformed ids, expired entries, and entries with no remaining waiter
    /// all report `NotFound`.
    pub fn resolve(&self, raw_id: &str, approved: bool) -> WardenResult<()> {
        let Some(id) = ApprovalId::parse(raw_id) else {
            warn!("rejecting approval response with malformed id");
            return Err(WardenError::ApprovalNotFound {
                id: "<malformed>".to_string(),
            });
        };

        let mut pending = self.lock();
        let Some(entry) = pending.remove(&id) else {
            debug!(approval_id = %id, "approval response for unknown id");
            return Err(WardenError::ApprovalNotFound { id: id.to_string() });
        };

        if entry.deadline <= Instant::now() {
            debug!(approval_id = %id, "approval response arrived after deadline");
            return Err(WardenError::ApprovalNotFound { id: id.to_string() });
        }

        if entry.responder.send(approved).is_err() {
            debug!(approval_id = %id, "approval response with no waiter left");
            return Err(WardenError::ApprovalNotFound { id: id.to_string() });
        }
        drop(pending);

        info!(approval_id = %id, approved, "approval resolved");
        Ok(())
    }

    /// Drop a pending approval without a decision. Its waiter sees `Denied`.
    ///
    /// Returns true if an entry was removed.
    pub fn discard(&self, id: &ApprovalId) -> bool {
        let removed = self.lock().remove(id).is_some();
        if removed {
            debug!(approval_id = %id, "approval discarded");
        }
        removed
    }

    /// Snapshot of every approval whose deadline has not yet passed.
    pub fn pending(&self) -> Vec<PendingSummary> {
        let now = Instant::now();
        let pending = self.lock();
        let mut summaries: Vec<PendingSummary> = pending
            .iter()
            .filter(|(_, entry)| entry.deadline > now)
            .map(|(id, entry)| PendingSummary {
                approval_id: id.clone(),
                description: entry.description.clone(),
                created_at: entry.created_at,
                seconds_remaining: entry.deadline.saturating_duration_since(now).as_secs(),
            })
            .collect();
        summaries.sort_by_key(|s| s.created_at);
        summaries
    }

    /// Number of entries currently stored, including not-yet-swept expired ones.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn decision(approved: bool) -> ApprovalOutcome {
    if approved {
        ApprovalOutcome::Approved
    } else {
        ApprovalOutcome::Denied
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use warden_contracts::{approval::ApprovalOutcome, error::WardenError};

    use super::{ApprovalBroker, DEFAULT_APPROVAL_TIMEOUT};

    fn broker() -> ApprovalBroker {
        ApprovalBroker::new(DEFAULT_APPROVAL_TIMEOUT)
    }

    #[tokio::test]
    async fn approve_wakes_the_waiter() {
        let broker = broker();
        let ticket = broker.create("bash: rm -rf build").unwrap();
        let id = ticket.id().to_string();

        broker.resolve(&id, true).unwrap();
        assert_eq!(broker.await_result(ticket).await, ApprovalOutcome::Approved);
        assert!(broker.is_empty());
    }

    #[tokio::test]
    async fn deny_wakes_the_waiter() {
        let broker = broker();
        let ticket = broker.create("bash: git push --force").unwrap();
        let id = ticket.id().to_string();

        broker.resolve(&id, false).unwrap();
        assert_eq!(broker.await_result(ticket).await, ApprovalOutcome::Denied);
    }

    #[tokio::test]
    async fn second_resolution_is_not_found_and_keeps_first_decision() {
        let broker = broker();
        let ticket = broker.create("write_file: ~/.ssh/config").unwrap();
        let id = ticket.id().to_string();

        broker.resolve(&id, false).unwrap();
        assert!(matches!(
            broker.resolve(&id, true),
            Err(WardenError::ApprovalNotFound { .. })
        ));
        assert_eq!(broker.await_result(ticket).await, ApprovalOutcome::Denied);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_resolutions_succeed_exactly_once() {
        for _ in 0..50 {
            let broker = Arc::new(broker());
            let ticket = broker.create("race").unwrap();
            let id = ticket.id().to_string();

            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let broker = broker.clone();
                    let id = id.clone();
                    tokio::spawn(async move { broker.resolve(&id, i % 2 == 0).is_ok() })
                })
                .collect();

            let mut successes = 0;
            for handle in handles {
                if handle.await.unwrap() {
                    successes += 1;
                }
            }
            assert_eq!(successes, 1, "exactly one resolver may win");
            assert_ne!(broker.await_result(ticket).await, ApprovalOutcome::TimedOut);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_approval_times_out_and_late_response_is_not_found() {
        let broker = Arc::new(broker());
        let ticket = broker.create("bash: kill -9 1").unwrap();
        let id = ticket.id().to_string();

        let waiter = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.await_result(ticket).await })
        };

        tokio::time::sleep(Duration::from_secs(121)).await;
        assert_eq!(waiter.await.unwrap(), ApprovalOutcome::TimedOut);
        assert!(broker.is_empty(), "timed-out entry must be evicted");

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert!(matches!(
            broker.resolve(&id, true),
            Err(WardenError::ApprovalNotFound { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn response_after_deadline_is_rejected_even_before_eviction() {
        let broker = broker();
        let ticket = broker.create("never awaited").unwrap();
        let id = ticket.id().to_string();

        tokio::time::advance(Duration::from_secs(121)).await;
        assert!(broker.resolve(&id, true).is_err());
        drop(ticket);
    }

    #[tokio::test]
    async fn malformed_ids_are_not_found() {
        let broker = broker();
        for raw in ["", "not-an-id", "../../secret", "ABCDEF0123456789ABCDEF0123456789"] {
            assert!(matches!(
                broker.resolve(raw, true),
                Err(WardenError::ApprovalNotFound { .. })
            ));
        }
    }

    #[tokio::test]
    async fn resolve_without_waiter_is_not_found() {
        let broker = broker();
        let ticket = broker.create("abandoned").unwrap();
        let id = ticket.id().to_string();
        drop(ticket);

        assert!(matches!(
            broker.resolve(&id, true),
            Err(WardenError::ApprovalNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn full_store_rejects_instead_of_evicting() {
        let broker = ApprovalBroker::with_capacity(DEFAULT_APPROVAL_TIMEOUT, 3);
        let tickets: Vec<_> = (0..3).map(|i| broker.create(format!("op {i}")).unwrap()).collect();

        assert!(matches!(
            broker.create("one too many"),
            Err(WardenError::CapacityExceeded { capacity: 3 })
        ));

        // Every live entry is still resolvable.
        for ticket in &tickets {
            broker.resolve(ticket.id().as_str(), true).unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_free_capacity() {
        let broker = ApprovalBroker::with_capacity(Duration::from_secs(10), 1);
        let _stale = broker.create("stale").unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(broker.create("fresh").is_ok());
        assert_eq!(broker.len(), 1);
    }

    #[tokio::test]
    async fn discarded_approval_is_denied_and_unresolvable() {
        let broker = broker();
        let ticket = broker.create("cancelled turn").unwrap();
        let id = ticket.id().clone();

        assert!(broker.discard(&id));
        assert!(broker.resolve(id.as_str(), true).is_err());
        assert_eq!(broker.await_result(ticket).await, ApprovalOutcome::Denied);
    }

    #[tokio::test]
    async fn pending_lists_live_entries() {
        let broker = broker();
        let first = broker.create("first").unwrap();
        let _second = broker.create("second").unwrap();

        let pending = broker.pending();
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().any(|p| &p.approval_id == first.id()));
        assert!(pending.iter().all(|p| p.seconds_remaining <= 120));
    }
}
