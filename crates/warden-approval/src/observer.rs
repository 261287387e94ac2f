//! Delivery of approval requests to whoever can answer them.

use tokio::sync::broadcast;
use tracing::debug;

use warden_contracts::approval::ApprovalRequest;

/// Receives approval requests as they are created.
///
/// `notify` returns false when the request could not be delivered to anyone.
/// The gate treats an undelivered request as denied instead of waiting out
/// the timeout.
pub trait ApprovalObserver: Send + Sync {
    fn notify(&self, request: &ApprovalRequest) -> bool;
}

/// Fans approval requests out over a tokio broadcast channel.
///
/// UI clients call `subscribe` and answer through the broker's `resolve`,
/// typically via the HTTP surface in [`crate::http`].
#[derive(Debug, Clone)]
pub struct BroadcastObserver {
    sender: broadcast::Sender<ApprovalRequest>,
}

impl BroadcastObserver {
    pub fn new(buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ApprovalRequest> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastObserver {
    fn default() -> Self {
        Self::new(64)
    }
}

impl ApprovalObserver for BroadcastObserver {
    fn notify(&self, request: &ApprovalRequest) -> bool {
        match self.sender.send(request.clone()) {
            Ok(receivers) => {
                debug!(approval_id = %request.approval_id, receivers, "approval request broadcast");
                true
            }
            Err(_) => {
                debug!(approval_id = %request.approval_id, "no approval subscribers");
                false
            }
        }
    }
}
