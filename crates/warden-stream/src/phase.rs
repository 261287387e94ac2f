//! The per-attempt phase state machine.
//!
//! ```text
//! Connecting --Connected--> WaitingFirstToken --Content--> Streaming --Finished--> Done
//!      \                          \                            \
//!       +--------------------------+----------------------------+--> Failed | Cancelled
//! ```
//!
//! Every non-terminal phase has one deadline. `Streaming` takes the earlier
//! of the per-chunk stall limit, which resets on every chunk, and the
//! overall stream limit, measured from the start of the attempt.

use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use warden_contracts::{config::StreamConfig, stream::StreamPhase};

/// Per-phase time limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamTimeouts {
    pub connect: Duration,
    pub first_token: Duration,
    pub stream: Duration,
    pub stall: Duration,
}

impl StreamTimeouts {
    pub fn from_config(config: &StreamConfig) -> Self {
        Self {
            connect: Duration::from_secs(config.connect_timeout),
            first_token: Duration::from_secs(config.first_token_timeout),
            stream: Duration::from_secs(config.stream_timeout),
            stall: Duration::from_secs(config.stall_timeout),
        }
    }
}

impl Default for StreamTimeouts {
    fn default() -> Self {
        Self::from_config(&StreamConfig::default())
    }
}

/// A discrete input to the phase machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    /// The first byte of the response arrived.
    Connected,
    /// A chunk carrying content (token or tool call).
    ContentReceived,
    /// A chunk without content.
    ChunkReceived,
    Finished,
    TimedOut,
    Errored,
    CancelRequested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid stream transition: {event:?} while {phase}")]
pub struct InvalidTransition {
    pub phase: StreamPhase,
    pub event: PhaseEvent,
}

/// Tracks one attempt's phase and the timestamps its deadlines derive from.
#[derive(Debug, Clone)]
pub struct PhaseTracker {
    phase: StreamPhase,
    attempt: u32,
    timeouts: StreamTimeouts,
    attempt_started: Instant,
    entered_at: Instant,
    last_chunk: Instant,
}

impl PhaseTracker {
    pub fn new(timeouts: StreamTimeouts, attempt: u32) -> Self {
        let now = Instant::now();
        Self {
            phase: StreamPhase::Connecting,
            attempt,
            timeouts,
            attempt_started: now,
            entered_at: now,
            last_chunk: now,
        }
    }

    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    pub fn elapsed_in_phase(&self) -> Duration {
        self.entered_at.elapsed()
    }

    /// Apply `event` and return the resulting phase.
    pub fn apply(&mut self, event: PhaseEvent) -> Result<StreamPhase, InvalidTransition> {
        use PhaseEvent::*;
        use StreamPhase::*;

        let next = match (self.phase, event) {
            (phase, _) if phase.is_terminal() => {
                return Err(InvalidTransition { phase, event });
            }
            (_, TimedOut | Errored) => Failed,
            (_, CancelRequested) => Cancelled,
            (Connecting, PhaseEvent::Connected) => WaitingFirstToken,
            (WaitingFirstToken, ContentReceived) => Streaming,
            (WaitingFirstToken, ChunkReceived) => WaitingFirstToken,
            (Streaming, ContentReceived | ChunkReceived) => {
                self.last_chunk = Instant::now();
                Streaming
            }
            (WaitingFirstToken | Streaming, Finished) => Done,
            (phase, event) => return Err(InvalidTransition { phase, event }),
        };

        if next != self.phase {
            let now = Instant::now();
            debug!(
                from = %self.phase,
                phase = %next,
                elapsed_ms = now.duration_since(self.entered_at).as_millis() as u64,
                attempt = self.attempt,
                "stream phase transition"
            );
            self.phase = next;
            self.entered_at = now;
            self.last_chunk = now;
        }
        Ok(next)
    }

    /// When the current phase times out, with the name of the limit that
    /// applies. `None` in terminal phases.
    pub fn deadline(&self) -> Option<(Instant, &'static str, Duration)> {
        match self.phase {
            StreamPhase::Connecting => {
                Some((self.entered_at + self.timeouts.connect, "connect", self.timeouts.connect))
            }
            StreamPhase::WaitingFirstToken => Some((
                self.entered_at + self.timeouts.first_token,
                "first-token",
                self.timeouts.first_token,
            )),
            StreamPhase::Streaming => {
                let stall = self.last_chunk + self.timeouts.stall;
                let overall = self.attempt_started + self.timeouts.stream;
                if stall < overall {
                    Some((stall, "stall", self.timeouts.stall))
                } else {
                    Some((overall, "stream", self.timeouts.stream))
                }
            }
            StreamPhase::Done | StreamPhase::Failed | StreamPhase::Cancelled => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> PhaseTracker {
        PhaseTracker::new(StreamTimeouts::default(), 1)
    }

    #[tokio::test(start_paused = true)]
    async fn happy_path() {
        let mut t = tracker();
        assert_eq!(t.apply(PhaseEvent::Connected), Ok(StreamPhase::WaitingFirstToken));
        assert_eq!(t.apply(PhaseEvent::ChunkReceived), Ok(StreamPhase::WaitingFirstToken));
        assert_eq!(t.apply(PhaseEvent::ContentReceived), Ok(StreamPhase::Streaming));
        assert_eq!(t.apply(PhaseEvent::Finished), Ok(StreamPhase::Done));
        assert!(t.deadline().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_phases_reject_events() {
        let mut t = tracker();
        t.apply(PhaseEvent::CancelRequested).unwrap();
        assert!(t.apply(PhaseEvent::Connected).is_err());
        assert!(t.apply(PhaseEvent::TimedOut).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn content_before_connect_is_invalid() {
        let mut t = tracker();
        assert!(t.apply(PhaseEvent::ContentReceived).is_err());
        assert_eq!(t.phase(), StreamPhase::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_and_cancel_reachable_from_every_live_phase() {
        for setup in [vec![], vec![PhaseEvent::Connected], vec![PhaseEvent::Connected, PhaseEvent::ContentReceived]] {
            for (event, expected) in [
                (PhaseEvent::TimedOut, StreamPhase::Failed),
                (PhaseEvent::Errored, StreamPhase::Failed),
                (PhaseEvent::CancelRequested, StreamPhase::Cancelled),
            ] {
                let mut t = tracker();
                for step in &setup {
                    t.apply(*step).unwrap();
                }
                assert_eq!(t.apply(event), Ok(expected));
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stall_deadline_resets_on_chunk() {
        let mut t = tracker();
        t.apply(PhaseEvent::Connected).unwrap();
        t.apply(PhaseEvent::ContentReceived).unwrap();
        let (first, limit, _) = t.deadline().unwrap();
        assert_eq!(limit, "stall");

        tokio::time::advance(Duration::from_secs(10)).await;
        t.apply(PhaseEvent::ChunkReceived).unwrap();
        let (second, _, _) = t.deadline().unwrap();
        assert_eq!(second - first, Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn overall_limit_wins_late_in_the_stream() {
        let mut t = tracker();
        t.apply(PhaseEvent::Connected).unwrap();
        t.apply(PhaseEvent::ContentReceived).unwrap();
        tokio::time::advance(Duration::from_secs(100)).await;
        t.apply(PhaseEvent::ChunkReceived).unwrap();
        let (_, limit, after) = t.deadline().unwrap();
        assert_eq!(limit, "stream");
        assert_eq!(after, Duration::from_secs(120));
    }
}
