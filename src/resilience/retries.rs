//! Retry logic.
//!
//! # Responsibilities
//! - Gate every attempt on the service's circuit breaker
//! - Retry transient failures with exponential backoff + jitter
//! - Stop immediately on client errors, local rejections and cancellation
//! - Report one outcome per logical call to the breaker
//!
//! # Design Decisions
//! - Exactly `max_retries + 1` attempts; the last error is returned as-is
//! - Probe calls (admitted while half-open) are never retried
//! - A probe dropped mid-flight gives its half-open slot back
//! - Local rejections and cancellations give no verdict about the backend
//! - Outcomes carry the admission permit, so a call that outlives a breaker
//!   transition cannot decide the new state

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::BackendServiceConfig;
use crate::errors::classifier::{classify, FailureCategory};
use crate::observability::metrics;
use crate::resilience::backoff::ExponentialBackoff;
use crate::resilience::circuit_breaker::{CircuitBreaker, Outcome, Permit};
use crate::resilience::timeouts::{run_attempt, sleep_or_cancel};
use crate::rpc::context::CallContext;
use crate::rpc::error::RpcError;

/// Retry budget and pacing for one service.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub call_timeout: Duration,
    pub backoff: ExponentialBackoff,
}

impl RetryPolicy {
    pub fn from_config(config: &BackendServiceConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            call_timeout: config.timeout(),
            backoff: ExponentialBackoff::from_config(config),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Per-attempt record handed to the attempt closure.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryAttempt {
    /// Zero-based attempt index.
    pub index: u32,
    /// Delay slept before this attempt.
    pub delay: Duration,
    pub previous_error: Option<RpcError>,
}

impl RetryAttempt {
    pub fn is_retry(&self) -> bool {
        self.index > 0
    }
}

/// Hands a half-open slot back if the call never reports an outcome.
struct PermitGuard<'a> {
    breaker: &'a CircuitBreaker,
    permit: Option<Permit>,
}

impl<'a> PermitGuard<'a> {
    fn new(breaker: &'a CircuitBreaker, permit: Permit) -> Self {
        Self {
            breaker,
            permit: Some(permit),
        }
    }

    fn complete(mut self, outcome: Outcome) {
        if let Some(permit) = self.permit.take() {
            self.breaker.complete(permit, outcome);
        }
    }

    fn disarm(mut self) {
        self.permit = None;
    }
}

impl Drop for PermitGuard<'_> {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            self.breaker.complete(permit, Outcome::Abandoned);
        }
    }
}

#[derive(Debug, Clone)]
pub struct Retrier {
    service: Arc<str>,
    policy: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
}

impl Retrier {
    pub fn new(service: impl Into<Arc<str>>, policy: RetryPolicy, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            service: service.into(),
            policy,
            breaker,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Run `op` under the retry and breaker policy. `op` performs exactly one
    /// remote attempt per invocation.
    pub async fn execute<T, F, Fut>(&self, ctx: &CallContext, mut op: F) -> Result<T, RpcError>
    where
        F: FnMut(RetryAttempt) -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        let max_attempts = self.policy.max_attempts();
        let mut attempt = RetryAttempt {
            index: 0,
            delay: Duration::ZERO,
            previous_error: None,
        };

        loop {
            ctx.check()?;

            let Some(permit) = self.breaker.try_acquire() else {
                tracing::debug!(
                    service = %self.service,
                    request_id = %ctx.request_id(),
                    attempt = attempt.index,
                    "Circuit breaker denied call"
                );
                return Err(RpcError::CircuitOpen {
                    service: self.service.to_string(),
                });
            };

            let guard = PermitGuard::new(&self.breaker, permit);
            let index = attempt.index;
            let result = run_attempt(ctx, self.policy.call_timeout, op(attempt.clone())).await;

            let err = match result {
                Ok(value) => {
                    guard.complete(Outcome::Success);
                    if index > 0 {
                        tracing::info!(
                            service = %self.service,
                            request_id = %ctx.request_id(),
                            attempts = index + 1,
                            "Call succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            let class = classify(&err);
            match class.category {
                FailureCategory::TransientRemote => {}
                FailureCategory::Client => {
                    // the backend answered; it is healthy even if the request was bad
                    guard.complete(Outcome::Success);
                    return Err(err);
                }
                FailureCategory::LocalResilience | FailureCategory::Canceled => {
                    // no verdict about the backend; a probe slot goes back
                    guard.complete(Outcome::Abandoned);
                    tracing::debug!(
                        service = %self.service,
                        request_id = %ctx.request_id(),
                        attempts = index + 1,
                        error = %err,
                        "Call ended without reaching the backend"
                    );
                    return Err(err);
                }
            }

            let last_attempt = index + 1 >= max_attempts;
            if !class.retryable || last_attempt || permit.is_probe() {
                guard.complete(Outcome::Failure);
                tracing::warn!(
                    service = %self.service,
                    request_id = %ctx.request_id(),
                    attempts = index + 1,
                    probe = permit.is_probe(),
                    error = %err,
                    "Call failed"
                );
                return Err(err);
            }

            // a failure is reported once, when the call gives up
            guard.disarm();
            let delay = self.policy.backoff.delay(index);
            tracing::info!(
                service = %self.service,
                request_id = %ctx.request_id(),
                attempt = index + 1,
                delay = ?delay,
                error = %err,
                "Retrying call"
            );
            metrics::record_retry(&self.service);
            sleep_or_cancel(ctx, delay).await?;

            attempt = RetryAttempt {
                index: index + 1,
                delay,
                previous_error: Some(err),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::RequestContext;
    use crate::resilience::circuit_breaker::{BreakerSettings, CircuitState};
    use crate::rpc::error::RpcCode;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn retrier(max_retries: u32, failure_threshold: u32) -> Retrier {
        let breaker = Arc::new(CircuitBreaker::new(
            "employee",
            BreakerSettings {
                failure_threshold,
                success_threshold: 1,
                max_requests: 1,
                interval: Duration::from_secs(60),
                timeout: Duration::from_secs(30),
            },
        ));
        let policy = RetryPolicy {
            max_retries,
            call_timeout: Duration::from_secs(5),
            backoff: ExponentialBackoff {
                initial: Duration::from_millis(100),
                max: Duration::from_secs(5),
                multiplier: 2.0,
                jitter: 0.0,
            },
        };
        Retrier::new("employee", policy, breaker)
    }

    fn ctx() -> CallContext {
        CallContext::new(RequestContext::generate())
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_failure_uses_whole_budget() {
        let r = retrier(3, 100);
        let calls = AtomicU32::new(0);
        let res: Result<(), _> = r
            .execute(&ctx(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(RpcError::status(RpcCode::Unavailable, "down")) }
            })
            .await;
        assert_eq!(res, Err(RpcError::status(RpcCode::Unavailable, "down")));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // one failure per logical call
        assert_eq!(r.breaker().counts().total_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn success_runs_once() {
        let r = retrier(3, 100);
        let calls = AtomicU32::new(0);
        let res = r
            .execute(&ctx(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, RpcError>(7) }
            })
            .await;
        assert_eq!(res, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(r.breaker().counts().total_successes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_short_circuits() {
        let r = retrier(5, 1);
        let calls = AtomicU32::new(0);
        let res: Result<(), _> = r
            .execute(&ctx(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(RpcError::status(RpcCode::InvalidArgument, "bad phone")) }
            })
            .await;
        assert_eq!(res.unwrap_err().code(), Some(RpcCode::InvalidArgument));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // client errors never open the breaker
        assert_eq!(r.breaker().state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_see_growing_delays_and_previous_error() {
        let r = retrier(3, 100);
        let mut seen = Vec::new();
        let _: Result<(), _> = r
            .execute(&ctx(), |attempt| {
                seen.push(attempt);
                async { Err(RpcError::Transport("connection reset".into())) }
            })
            .await;
        let delays: Vec<_> = seen.iter().map(|a| a.delay.as_millis()).collect();
        assert_eq!(delays, vec![0, 100, 200, 400]);
        assert!(seen[0].previous_error.is_none());
        assert!(seen[1..].iter().all(|a| a.previous_error.is_some() && a.is_retry()));
    }

    #[tokio::test(start_paused = true)]
    async fn open_breaker_fails_without_calling() {
        let r = retrier(3, 1);
        r.breaker().record_failure();
        let calls = AtomicU32::new(0);
        let res: Result<(), _> = r
            .execute(&ctx(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;
        assert!(matches!(res, Err(RpcError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_during_backoff_returns_promptly() {
        let mut r = retrier(10, 100);
        r.policy.backoff.initial = Duration::from_secs(2);
        let ctx = ctx().with_timeout(Duration::from_millis(500));
        let start = tokio::time::Instant::now();
        let calls = AtomicU32::new(0);
        let res: Result<(), _> = r
            .execute(&ctx, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(RpcError::status(RpcCode::Unavailable, "down")) }
            })
            .await;
        assert_eq!(res, Err(RpcError::DeadlineExceeded));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(500));
        assert!(elapsed < Duration::from_millis(600));
        // abandonment is not a breaker failure
        assert_eq!(r.breaker().counts().total_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_probe_is_not_retried() {
        let r = retrier(3, 1);
        r.breaker().record_failure();
        tokio::time::advance(Duration::from_secs(30)).await;
        let calls = AtomicU32::new(0);
        let res: Result<(), _> = r
            .execute(&ctx(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(RpcError::status(RpcCode::Unavailable, "still down")) }
            })
            .await;
        assert_eq!(res.unwrap_err().code(), Some(RpcCode::Unavailable));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(r.breaker().state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_probe_returns_its_slot() {
        let r = retrier(0, 1);
        r.breaker().record_failure();
        tokio::time::advance(Duration::from_secs(30)).await;

        let ctx = ctx();
        let pending = r.execute(&ctx, |_| async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok::<_, RpcError>(())
        });
        // poll far enough to admit the probe, then drop it
        let _ = tokio::time::timeout(Duration::from_millis(10), pending).await;
        assert_eq!(r.breaker().state(), CircuitState::HalfOpen);
        assert!(r.breaker().can_execute());
    }

    /// Let spawned tasks run up to their next timer.
    async fn let_run() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn spawn_call(
        r: &Retrier,
        work: Duration,
        reply: Result<(), RpcError>,
    ) -> tokio::task::JoinHandle<Result<(), RpcError>> {
        let r = r.clone();
        tokio::spawn(async move {
            r.execute(&ctx(), |_| {
                let reply = reply.clone();
                async move {
                    tokio::time::sleep(work).await;
                    reply
                }
            })
            .await
        })
    }

    #[tokio::test(start_paused = true)]
    async fn slow_success_from_before_opening_does_not_close_circuit() {
        let r = retrier(0, 1);
        let slow = spawn_call(&r, Duration::from_secs(40), Ok(()));
        let_run().await;

        r.breaker().record_failure();
        assert_eq!(r.breaker().state(), CircuitState::Open);
        tokio::time::advance(Duration::from_secs(30)).await;

        let trial = spawn_call(&r, Duration::from_secs(100), Ok(()));
        let_run().await;
        assert_eq!(r.breaker().state(), CircuitState::HalfOpen);

        assert_eq!(slow.await.unwrap(), Ok(()));
        assert_eq!(r.breaker().state(), CircuitState::HalfOpen);

        assert_eq!(trial.await.unwrap(), Ok(()));
        assert_eq!(r.breaker().state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_failure_from_before_opening_does_not_reopen_circuit() {
        let r = retrier(0, 1);
        let down = Err(RpcError::status(RpcCode::Unavailable, "down"));
        let slow = spawn_call(&r, Duration::from_secs(40), down);
        let_run().await;

        r.breaker().record_failure();
        tokio::time::advance(Duration::from_secs(30)).await;
        let trial = spawn_call(&r, Duration::from_secs(100), Ok(()));
        let_run().await;

        assert!(slow.await.unwrap().is_err());
        assert_eq!(r.breaker().state(), CircuitState::HalfOpen);
        assert_eq!(trial.await.unwrap(), Ok(()));
        assert_eq!(r.breaker().state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn denial_between_retries_leaves_half_open_alone() {
        let mut r = retrier(3, 1);
        r.policy.backoff.initial = Duration::from_secs(40);
        r.policy.backoff.max = Duration::from_secs(60);
        let retrying = {
            let r = r.clone();
            tokio::spawn(async move {
                r.execute(&ctx(), |_| async {
                    Err::<(), _>(RpcError::status(RpcCode::Unavailable, "restarting"))
                })
                .await
            })
        };
        let_run().await;
        // first attempt failed; the call is sleeping before its retry
        assert_eq!(r.breaker().state(), CircuitState::Closed);

        r.breaker().record_failure();
        tokio::time::advance(Duration::from_secs(30)).await;
        let trial = spawn_call(&r, Duration::from_secs(100), Ok(()));
        let_run().await;

        let err = retrying.await.unwrap().unwrap_err();
        assert!(matches!(err, RpcError::CircuitOpen { .. }));
        assert_eq!(r.breaker().state(), CircuitState::HalfOpen);

        assert_eq!(trial.await.unwrap(), Ok(()));
        assert_eq!(r.breaker().state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn local_error_while_half_open_gives_slot_back() {
        let r = retrier(3, 1);
        r.breaker().record_failure();
        tokio::time::advance(Duration::from_secs(30)).await;

        let res: Result<(), _> = r
            .execute(&ctx(), |_| async {
                Err(RpcError::ConnectionUnavailable {
                    service: "employee".into(),
                    reason: "connection refused".into(),
                })
            })
            .await;
        assert!(matches!(res, Err(RpcError::ConnectionUnavailable { .. })));
        assert_eq!(r.breaker().state(), CircuitState::HalfOpen);
        assert_eq!(r.breaker().counts().total_successes, 0);
        // the slot is free for the next trial
        assert!(r.breaker().can_execute());
    }

    #[tokio::test(start_paused = true)]
    async fn remote_cancel_is_neither_success_nor_failure() {
        let r = retrier(3, 1);
        let calls = AtomicU32::new(0);
        let res: Result<(), _> = r
            .execute(&ctx(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(RpcError::status(RpcCode::Cancelled, "backend canceled")) }
            })
            .await;
        assert_eq!(res.unwrap_err().code(), Some(RpcCode::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let counts = r.breaker().counts();
        assert_eq!(counts.total_successes, 0);
        assert_eq!(counts.total_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn client_error_while_half_open_closes_circuit() {
        let r = retrier(3, 1);
        r.breaker().record_failure();
        tokio::time::advance(Duration::from_secs(30)).await;
        let res: Result<(), _> = r
            .execute(&ctx(), |_| async {
                Err(RpcError::status(RpcCode::NotFound, "no such employee"))
            })
            .await;
        assert_eq!(res.unwrap_err().code(), Some(RpcCode::NotFound));
        assert_eq!(r.breaker().state(), CircuitState::Closed);
    }
}
