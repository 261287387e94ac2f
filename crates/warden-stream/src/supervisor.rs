//! The stream supervisor.
//!
//! `StreamSupervisor::run` drives one logical upstream call to completion:
//! each attempt walks the `PhaseTracker` state machine, a transient failure
//! is retried after a backoff, and a permanent failure disables the
//! supervisor for the rest of the run. Every wait (connect, next chunk,
//! backoff) races the caller's cancellation token, so a cancel is observed
//! immediately in any phase.
//!
//! The disabled state belongs to the supervisor, so every loop sharing one
//! supervisor stops calling upstream after a permanent failure.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use warden_contracts::{
    config::StreamConfig,
    error::{WardenError, WardenResult},
    message::{ModelRequest, ModelResponse},
};

use crate::phase::{PhaseEvent, PhaseTracker, StreamTimeouts};
use crate::retry::RetryPolicy;
use crate::upstream::{StreamEvent, Upstream, UpstreamError, UpstreamStream};

/// A completed stream and how many attempts it took.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamOutcome {
    pub response: ModelResponse,
    pub attempts: u32,
    pub elapsed: Duration,
}

enum AttemptError {
    Cancelled,
    Upstream(UpstreamError),
}

/// Runs upstream streaming calls under phase timeouts and a retry policy.
pub struct StreamSupervisor {
    timeouts: StreamTimeouts,
    retry: RetryPolicy,
    disabled: Mutex<Option<String>>,
}

impl StreamSupervisor {
    pub fn new(timeouts: StreamTimeouts, retry: RetryPolicy) -> Self {
        Self {
            timeouts,
            retry,
            disabled: Mutex::new(None),
        }
    }

    /// An interactive supervisor using the configured timeouts and attempts.
    pub fn from_config(config: &StreamConfig) -> Self {
        Self::new(
            StreamTimeouts::from_config(config),
            RetryPolicy::interactive(config.max_attempts),
        )
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// The permanent failure that disabled this supervisor, if any.
    pub fn disabled_reason(&self) -> Option<String> {
        self.disabled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn disable(&self, reason: &str) {
        let mut disabled = self.disabled.lock().unwrap_or_else(PoisonError::into_inner);
        if disabled.is_none() {
            *disabled = Some(reason.to_string());
        }
    }

    /// Stream `request` from `upstream` until done, failed, or cancelled.
    ///
    /// # Errors
    ///
    /// - `Cancelled` as soon as `cancel` fires, in any phase or backoff
    /// - `Permanent` on a non-retryable failure, and on every later call
    /// - `Transient` once the retry budget is spent
    pub async fn run(
        &self,
        upstream: &dyn Upstream,
        request: &ModelRequest,
        cancel: &CancellationToken,
    ) -> WardenResult<StreamOutcome> {
        if let Some(reason) = self.disabled_reason() {
            debug!(reason = %reason, "supervisor disabled, refusing upstream call");
            return Err(WardenError::Permanent { reason });
        }

        let started = Instant::now();
        let mut attempt = 0;
        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(WardenError::Cancelled);
            }

            let error = match self.attempt(upstream, request, cancel, attempt).await {
                Ok(response) => {
                    debug!(
                        attempt,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        tool_calls = response.tool_calls.len(),
                        "upstream stream complete"
                    );
                    return Ok(StreamOutcome {
                        response,
                        attempts: attempt,
                        elapsed: started.elapsed(),
                    });
                }
                Err(AttemptError::Cancelled) => {
                    info!(attempt, "upstream stream cancelled");
                    return Err(WardenError::Cancelled);
                }
                Err(AttemptError::Upstream(error)) => error,
            };

            if !error.is_transient() {
                warn!(attempt, error = %error, "permanent upstream failure, disabling caller");
                let reason = error.to_string();
                self.disable(&reason);
                return Err(WardenError::Permanent { reason });
            }

            if !self.retry.allows_retry_after(attempt) {
                warn!(attempt, error = %error, "upstream retries exhausted");
                return Err(WardenError::Transient {
                    reason: error.to_string(),
                    attempts: attempt,
                });
            }

            let delay = self.retry.delay_after(attempt);
            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "transient upstream failure, backing off"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(attempt, "cancelled during retry backoff");
                    return Err(WardenError::Cancelled);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn attempt(
        &self,
        upstream: &dyn Upstream,
        request: &ModelRequest,
        cancel: &CancellationToken,
        attempt: u32,
    ) -> Result<ModelResponse, AttemptError> {
        let mut tracker = PhaseTracker::new(self.timeouts, attempt);

        let mut stream: Box<dyn UpstreamStream> = {
            let (deadline, limit, after) = live_deadline(&tracker);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled(&mut tracker)),
                connected = tokio::time::timeout_at(deadline, upstream.connect(request)) => {
                    match connected {
                        Ok(Ok(stream)) => stream,
                        Ok(Err(error)) => return Err(failed(&mut tracker, PhaseEvent::Errored, error)),
                        Err(_) => {
                            let error = UpstreamError::timeout(tracker.phase(), limit, after);
                            return Err(failed(&mut tracker, PhaseEvent::TimedOut, error));
                        }
                    }
                }
            }
        };
        advance(&mut tracker, PhaseEvent::Connected);

        let mut response = ModelResponse::default();
        loop {
            let (deadline, limit, after) = live_deadline(&tracker);
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled(&mut tracker)),
                next = tokio::time::timeout_at(deadline, stream.next_event()) => next,
            };

            match next {
                Err(_) => {
                    let error = UpstreamError::timeout(tracker.phase(), limit, after);
                    return Err(failed(&mut tracker, PhaseEvent::TimedOut, error));
                }
                Ok(None) => {
                    advance(&mut tracker, PhaseEvent::Finished);
                    return Ok(response);
                }
                Ok(Some(Err(error))) => return Err(failed(&mut tracker, PhaseEvent::Errored, error)),
                Ok(Some(Ok(event))) => {
                    let phase_event = if event.is_content() {
                        PhaseEvent::ContentReceived
                    } else {
                        PhaseEvent::ChunkReceived
                    };
                    match event {
                        StreamEvent::Token(text) => response.content.push_str(&text),
                        StreamEvent::ToolCall(call) => response.tool_calls.push(call),
                        StreamEvent::KeepAlive => {}
                    }
                    advance(&mut tracker, phase_event);
                }
            }
        }
    }
}

// The tracker is only ever driven with events valid for its current phase
// from inside `attempt`, so a rejected transition is logged, not surfaced.
fn advance(tracker: &mut PhaseTracker, event: PhaseEvent) {
    if let Err(e) = tracker.apply(event) {
        warn!(error = %e, "ignored stream phase event");
    }
}

fn live_deadline(tracker: &PhaseTracker) -> (Instant, &'static str, Duration) {
    tracker
        .deadline()
        .unwrap_or_else(|| (Instant::now(), "stream", Duration::ZERO))
}

fn cancelled(tracker: &mut PhaseTracker) -> AttemptError {
    debug!(phase = %tracker.phase(), "cancel requested");
    advance(tracker, PhaseEvent::CancelRequested);
    AttemptError::Cancelled
}

fn failed(tracker: &mut PhaseTracker, event: PhaseEvent, error: UpstreamError) -> AttemptError {
    debug!(
        phase = %tracker.phase(),
        elapsed_ms = tracker.elapsed_in_phase().as_millis() as u64,
        error = %error,
        "stream attempt failed"
    );
    advance(tracker, event);
    AttemptError::Upstream(error)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    use warden_contracts::{
        error::WardenError,
        message::{ModelRequest, ToolCallProposal},
    };

    use super::StreamSupervisor;
    use crate::phase::StreamTimeouts;
    use crate::retry::RetryPolicy;
    use crate::upstream::{StreamEvent, Upstream, UpstreamError, UpstreamStream};

    // ── Scripted upstream ────────────────────────────────────────────────────

    enum Step {
        After(Duration, Result<StreamEvent, UpstreamError>),
        Hang,
    }

    struct Script {
        connect_delay: Duration,
        connect_error: Option<UpstreamError>,
        steps: Vec<Step>,
    }

    impl Script {
        fn ok(steps: Vec<Step>) -> Self {
            Self {
                connect_delay: Duration::ZERO,
                connect_error: None,
                steps,
            }
        }

        fn refuse(error: UpstreamError) -> Self {
            Self {
                connect_delay: Duration::ZERO,
                connect_error: Some(error),
                steps: vec![],
            }
        }

        fn slow_connect(delay: Duration) -> Self {
            Self {
                connect_delay: delay,
                connect_error: None,
                steps: vec![],
            }
        }
    }

    struct ScriptedUpstream {
        scripts: Mutex<VecDeque<Script>>,
        connects: AtomicU32,
    }

    impl ScriptedUpstream {
        fn new(scripts: Vec<Script>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(scripts.into()),
                connects: AtomicU32::new(0),
            })
        }

        fn connects(&self) -> u32 {
            self.connects.load(Ordering::SeqCst)
        }
    }

    struct ScriptedStream {
        steps: VecDeque<Step>,
    }

    #[async_trait]
    impl Upstream for ScriptedUpstream {
        async fn connect(
            &self,
            _request: &ModelRequest,
        ) -> Result<Box<dyn UpstreamStream>, UpstreamError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let script = self
                .scripts
                .lock()
                .unwrap()
                .pop_front()
                .expect("script exhausted");
            tokio::time::sleep(script.connect_delay).await;
            if let Some(error) = script.connect_error {
                return Err(error);
            }
            Ok(Box::new(ScriptedStream {
                steps: script.steps.into(),
            }))
        }
    }

    #[async_trait]
    impl UpstreamStream for ScriptedStream {
        async fn next_event(&mut self) -> Option<Result<StreamEvent, UpstreamError>> {
            match self.steps.pop_front()? {
                Step::After(delay, item) => {
                    tokio::time::sleep(delay).await;
                    Some(item)
                }
                Step::Hang => std::future::pending().await,
            }
        }
    }

    fn token(text: &str) -> Step {
        Step::After(Duration::from_millis(10), Ok(StreamEvent::Token(text.to_string())))
    }

    fn supervisor(max_attempts: u32) -> StreamSupervisor {
        StreamSupervisor::new(StreamTimeouts::default(), RetryPolicy::interactive(max_attempts))
    }

    // ── Tests ────────────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn assembles_tokens_and_tool_calls() {
        let call = ToolCallProposal {
            call_id: "c1".to_string(),
            name: "bash".to_string(),
            arguments: serde_json::json!({"command": "ls"}),
        };
        let upstream = ScriptedUpstream::new(vec![Script::ok(vec![
            Step::After(Duration::from_millis(5), Ok(StreamEvent::KeepAlive)),
            token("Hello, "),
            token("world"),
            Step::After(Duration::ZERO, Ok(StreamEvent::ToolCall(call.clone()))),
        ])]);

        let outcome = supervisor(3)
            .run(upstream.as_ref(), &ModelRequest::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.response.content, "Hello, world");
        assert_eq!(outcome.response.tool_calls, vec![call]);
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_timeout_is_retried() {
        let upstream = ScriptedUpstream::new(vec![
            Script::slow_connect(Duration::from_secs(60)),
            Script::ok(vec![token("ok")]),
        ]);

        let outcome = supervisor(3)
            .run(upstream.as_ref(), &ModelRequest::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.response.content, "ok");
        // 5s connect limit plus the 1s first backoff.
        assert!(outcome.elapsed >= Duration::from_secs(6));
        assert!(outcome.elapsed < Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn first_token_timeout_exhausts_interactive_budget() {
        let upstream = ScriptedUpstream::new(vec![
            Script::ok(vec![Step::Hang]),
            Script::ok(vec![Step::Hang]),
            Script::ok(vec![Step::Hang]),
        ]);

        let result = supervisor(3)
            .run(upstream.as_ref(), &ModelRequest::default(), &CancellationToken::new())
            .await;
        match result {
            Err(WardenError::Transient { reason, attempts }) => {
                assert_eq!(attempts, 3);
                assert!(reason.contains("first-token"), "{reason}");
            }
            other => panic!("expected Transient, got {:?}", other),
        }
        assert_eq!(upstream.connects(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn keepalives_do_not_extend_first_token_wait() {
        let keepalive = || Step::After(Duration::from_secs(10), Ok(StreamEvent::KeepAlive));
        let upstream = ScriptedUpstream::new(vec![Script::ok(vec![
            keepalive(),
            keepalive(),
            keepalive(),
            keepalive(),
            token("late"),
        ])]);

        let started = Instant::now();
        let result = supervisor(1)
            .run(upstream.as_ref(), &ModelRequest::default(), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(WardenError::Transient { .. })));
        assert_eq!(started.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn stall_after_first_token_fails() {
        let upstream = ScriptedUpstream::new(vec![Script::ok(vec![token("partial"), Step::Hang])]);

        match supervisor(1)
            .run(upstream.as_ref(), &ModelRequest::default(), &CancellationToken::new())
            .await
        {
            Err(WardenError::Transient { reason, .. }) => assert!(reason.contains("stall"), "{reason}"),
            other => panic!("expected stall timeout, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn overall_stream_limit_applies_despite_steady_chunks() {
        let steps = (0..20)
            .map(|_| Step::After(Duration::from_secs(20), Ok(StreamEvent::Token(".".to_string()))))
            .collect();
        let upstream = ScriptedUpstream::new(vec![Script::ok(steps)]);

        let started = Instant::now();
        match supervisor(1)
            .run(upstream.as_ref(), &ModelRequest::default(), &CancellationToken::new())
            .await
        {
            Err(WardenError::Transient { reason, .. }) => assert!(reason.contains("stream timeout"), "{reason}"),
            other => panic!("expected stream timeout, got {:?}", other),
        }
        assert_eq!(started.elapsed(), Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_then_success() {
        let upstream = ScriptedUpstream::new(vec![
            Script::refuse(UpstreamError::from_status(429, "slow down")),
            Script::refuse(UpstreamError::from_status(503, "overloaded")),
            Script::ok(vec![token("done")]),
        ]);

        let outcome = supervisor(3)
            .run(upstream.as_ref(), &ModelRequest::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_disables_the_caller() {
        let upstream = ScriptedUpstream::new(vec![
            Script::refuse(UpstreamError::from_status(401, "bad key")),
            Script::ok(vec![token("never reached")]),
        ]);
        let supervisor = supervisor(3);

        let first = supervisor
            .run(upstream.as_ref(), &ModelRequest::default(), &CancellationToken::new())
            .await;
        assert!(matches!(first, Err(WardenError::Permanent { .. })));
        assert_eq!(upstream.connects(), 1, "permanent failures are not retried");

        let second = supervisor
            .run(upstream.as_ref(), &ModelRequest::default(), &CancellationToken::new())
            .await;
        assert!(matches!(second, Err(WardenError::Permanent { .. })));
        assert_eq!(upstream.connects(), 1, "a disabled caller never reconnects");
        assert!(supervisor.disabled_reason().unwrap().contains("authentication"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_backoff_is_immediate() {
        let upstream = ScriptedUpstream::new(vec![
            Script::refuse(UpstreamError::from_status(500, "boom")),
            Script::ok(vec![token("too late")]),
        ]);
        let supervisor = Arc::new(StreamSupervisor::new(
            StreamTimeouts::default(),
            RetryPolicy::background(),
        ));
        let cancel = CancellationToken::new();

        let started = Instant::now();
        let task = {
            let supervisor = supervisor.clone();
            let upstream = upstream.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                supervisor
                    .run(upstream.as_ref(), &ModelRequest::default(), &cancel)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_secs(5)).await;
        cancel.cancel();
        assert!(matches!(task.await.unwrap(), Err(WardenError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(30), "backoff must not finish first");
        assert_eq!(upstream.connects(), 1, "no retry after cancellation");
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_while_connecting() {
        let upstream = ScriptedUpstream::new(vec![Script::slow_connect(Duration::from_secs(4))]);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let result = supervisor(3)
            .run(upstream.as_ref(), &ModelRequest::default(), &cancel)
            .await;
        assert!(matches!(result, Err(WardenError::Cancelled)));
        assert_eq!(started.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn already_cancelled_never_connects() {
        let upstream = ScriptedUpstream::new(vec![]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = supervisor(3)
            .run(upstream.as_ref(), &ModelRequest::default(), &cancel)
            .await;
        assert!(matches!(result, Err(WardenError::Cancelled)));
        assert_eq!(upstream.connects(), 0);
    }
}
