//! Streaming phase types shared between the supervisor and its callers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle phase of a single upstream streaming call.
///
/// `Connecting → WaitingFirstToken → Streaming → Done`, with `Failed` and
/// `Cancelled` reachable from every non-terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamPhase {
    Connecting,
    WaitingFirstToken,
    Streaming,
    Done,
    Failed,
    Cancelled,
}

impl StreamPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for StreamPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::WaitingFirstToken => "waiting_first_token",
            Self::Streaming => "streaming",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}
