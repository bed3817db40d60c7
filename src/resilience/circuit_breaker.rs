//! Circuit breaker for backend protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: backend assumed down, calls fail fast
//! - Half-Open: a limited number of probe calls test recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= failure_threshold within interval
//! Open → Half-Open: cool-down elapsed (observed by can_execute)
//! Half-Open → Closed: success_threshold probe successes
//! Half-Open → Open: any probe failure
//! ```
//!
//! # Design Decisions
//! - Per-backend circuit breaker (not global)
//! - State and generation are mirrored in one atomic so `state()` and the
//!   Closed fast path of admission never take the lock
//! - Counters reset on every transition; each transition starts a new
//!   generation
//! - Admission hands out a [`Permit`] stamped with the generation; outcomes
//!   reported against an earlier generation are discarded

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;

/// Circuit state.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed = 0,
    HalfOpen = 1,
    Open = 2,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::HalfOpen => "half_open",
            CircuitState::Open => "open",
        }
    }
}

impl From<u8> for CircuitState {
    fn from(val: u8) -> Self {
        match val {
            1 => CircuitState::HalfOpen,
            2 => CircuitState::Open,
            _ => CircuitState::Closed,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runtime settings, resolved from [`CircuitBreakerConfig`].
#[derive(Debug, Clone)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    /// Probe budget while half-open.
    pub max_requests: u32,
    /// Closed-state counting window; zero never resets.
    pub interval: Duration,
    /// Open-state cool-down.
    pub timeout: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        CircuitBreakerConfig::default().settings()
    }
}

/// Snapshot of breaker counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub requests: u32,
    pub total_successes: u32,
    pub total_failures: u32,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

impl Counts {
    fn on_success(&mut self) {
        self.total_successes += 1;
        self.consecutive_successes += 1;
        self.consecutive_failures = 0;
    }

    fn on_failure(&mut self) {
        self.total_failures += 1;
        self.consecutive_failures += 1;
        self.consecutive_successes = 0;
    }
}

/// Admission ticket for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permit {
    generation: u64,
    probe: bool,
}

impl Permit {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Admitted while half-open.
    pub fn is_probe(&self) -> bool {
        self.probe
    }
}

/// What a finished call reports back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    /// No verdict about the backend; a probe slot is handed back.
    Abandoned,
}

const STATE_MASK: u64 = 0b11;

fn pack(state: CircuitState, generation: u64) -> u64 {
    (generation << 2) | state as u64
}

fn unpack(mirror: u64) -> (CircuitState, u64) {
    (CircuitState::from((mirror & STATE_MASK) as u8), mirror >> 2)
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    counts: Counts,
    generation: u64,
    /// Closed: end of the counting window. Open: end of the cool-down.
    expiry: Option<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    service: String,
    settings: BreakerSettings,
    mirror: AtomicU64,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(service: impl Into<String>, settings: BreakerSettings) -> Self {
        let now = Instant::now();
        let expiry = deadline_after(now, settings.interval);
        let service = service.into();
        metrics::set_breaker_state(&service, CircuitState::Closed);
        Self {
            service,
            settings,
            mirror: AtomicU64::new(pack(CircuitState::Closed, 0)),
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                counts: Counts::default(),
                generation: 0,
                expiry,
            }),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn settings(&self) -> &BreakerSettings {
        &self.settings
    }

    /// Current state. Observational only: an elapsed cool-down is not
    /// applied until the next admission.
    pub fn state(&self) -> CircuitState {
        unpack(self.mirror.load(Ordering::Acquire)).0
    }

    pub fn counts(&self) -> Counts {
        self.inner.lock().counts
    }

    /// Number of transitions so far.
    pub fn generation(&self) -> u64 {
        unpack(self.mirror.load(Ordering::Acquire)).1
    }

    /// Whether a call may proceed now. Consumes a probe slot when half-open.
    pub fn can_execute(&self) -> bool {
        self.try_acquire().is_some()
    }

    /// Admit one call, or `None` while open or out of probe budget.
    pub fn try_acquire(&self) -> Option<Permit> {
        let (state, generation) = unpack(self.mirror.load(Ordering::Acquire));
        if state == CircuitState::Closed {
            return Some(Permit {
                generation,
                probe: false,
            });
        }

        let now = Instant::now();
        let mut inner = self.inner.lock();
        let probe = match inner.state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                if !inner.expiry.is_some_and(|expiry| now >= expiry) {
                    return None;
                }
                self.transition(&mut inner, CircuitState::HalfOpen, now);
                inner.counts.requests = 1;
                true
            }
            CircuitState::HalfOpen => {
                if inner.counts.requests >= self.settings.max_requests {
                    return None;
                }
                inner.counts.requests += 1;
                true
            }
        };
        Some(Permit {
            generation: inner.generation,
            probe,
        })
    }

    /// Report the outcome of a call admitted with `permit`. Ignored when the
    /// breaker has moved to another generation since.
    pub fn complete(&self, permit: Permit, outcome: Outcome) {
        self.settle(Some(permit.generation), outcome);
    }

    /// Record a success against the current generation.
    pub fn record_success(&self) {
        self.settle(None, Outcome::Success);
    }

    /// Record a failure against the current generation.
    pub fn record_failure(&self) {
        self.settle(None, Outcome::Failure);
    }

    /// A probe ended without an outcome (caller canceled). Its slot is
    /// returned so the half-open budget is not leaked.
    pub fn record_abandoned(&self) {
        self.settle(None, Outcome::Abandoned);
    }

    fn settle(&self, generation: Option<u64>, outcome: Outcome) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        if generation.is_some_and(|g| g != inner.generation) {
            tracing::debug!(
                service = %self.service,
                outcome = ?outcome,
                "Discarding outcome from an earlier breaker generation"
            );
            return;
        }

        match (inner.state, outcome) {
            (CircuitState::Closed, Outcome::Success) => {
                self.roll_window(&mut inner, now);
                inner.counts.on_success();
            }
            (CircuitState::Closed, Outcome::Failure) => {
                self.roll_window(&mut inner, now);
                inner.counts.on_failure();
                if inner.counts.consecutive_failures >= self.settings.failure_threshold {
                    self.transition(&mut inner, CircuitState::Open, now);
                }
            }
            (CircuitState::HalfOpen, Outcome::Success) => {
                inner.counts.on_success();
                if inner.counts.consecutive_successes >= self.settings.success_threshold {
                    self.transition(&mut inner, CircuitState::Closed, now);
                }
            }
            (CircuitState::HalfOpen, Outcome::Failure) => {
                inner.counts.on_failure();
                self.transition(&mut inner, CircuitState::Open, now);
            }
            (CircuitState::HalfOpen, Outcome::Abandoned) => {
                inner.counts.requests = inner.counts.requests.saturating_sub(1);
            }
            (CircuitState::Closed, Outcome::Abandoned) | (CircuitState::Open, _) => {}
        }
    }

    fn roll_window(&self, inner: &mut Inner, now: Instant) {
        if inner.expiry.is_some_and(|expiry| now >= expiry) {
            inner.counts = Counts::default();
            inner.expiry = deadline_after(now, self.settings.interval);
        }
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState, now: Instant) {
        let from = inner.state;
        if from == to {
            return;
        }

        inner.state = to;
        inner.generation += 1;
        inner.counts = Counts::default();
        inner.expiry = match to {
            CircuitState::Closed => deadline_after(now, self.settings.interval),
            // an unrepresentable cool-down keeps the circuit open
            CircuitState::Open => now.checked_add(self.settings.timeout),
            CircuitState::HalfOpen => None,
        };
        self.mirror.store(pack(to, inner.generation), Ordering::Release);

        match to {
            CircuitState::Open => tracing::warn!(
                service = %self.service,
                from = %from,
                cooldown = ?self.settings.timeout,
                "Circuit breaker opened"
            ),
            _ => tracing::info!(
                service = %self.service,
                from = %from,
                to = %to,
                "Circuit breaker state changed"
            ),
        }
        metrics::record_breaker_transition(&self.service, to);
    }
}

/// End of a window starting at `now`. Zero or unrepresentable windows never
/// end.
fn deadline_after(now: Instant, interval: Duration) -> Option<Instant> {
    if interval.is_zero() {
        None
    } else {
        now.checked_add(interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn breaker(failure_threshold: u32, max_requests: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "auth",
            BreakerSettings {
                failure_threshold,
                success_threshold: 1,
                max_requests,
                interval: Duration::from_secs(60),
                timeout: Duration::from_secs(1),
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold() {
        let cb = breaker(3, 1);
        for _ in 0..2 {
            assert!(cb.can_execute());
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_execute());
        assert_eq!(cb.counts(), Counts::default());
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_consecutive_failures() {
        let cb = breaker(3, 1);
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.counts().total_failures, 4);
        assert_eq!(cb.counts().consecutive_failures, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn counting_window_expires() {
        let cb = breaker(3, 1);
        cb.record_failure();
        cb.record_failure();
        tokio::time::advance(Duration::from_secs(61)).await;
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.counts().consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_moves_to_half_open_on_next_check() {
        let cb = breaker(1, 1);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(999)).await;
        assert!(!cb.can_execute());

        tokio::time::advance(Duration::from_millis(1)).await;
        // state() has no side effects
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.can_execute());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        // probe budget of one is spent
        assert!(!cb.can_execute());
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_failure_reopens() {
        let cb = breaker(1, 1);
        cb.record_failure();
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cb.can_execute());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_execute());
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_success_closes() {
        let cb = breaker(1, 1);
        cb.record_failure();
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cb.can_execute());
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.can_execute());
        assert_eq!(cb.generation(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn success_threshold_requires_a_run() {
        let cb = CircuitBreaker::new(
            "chat",
            BreakerSettings {
                failure_threshold: 1,
                success_threshold: 2,
                max_requests: 3,
                interval: Duration::ZERO,
                timeout: Duration::from_secs(1),
            },
        );
        cb.record_failure();
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cb.can_execute());
        assert!(cb.can_execute());
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_probe_returns_slot() {
        let cb = breaker(1, 1);
        cb.record_failure();
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cb.can_execute());
        assert!(!cb.can_execute());
        cb.record_abandoned();
        assert!(cb.can_execute());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_permit_cannot_decide_half_open() {
        let cb = breaker(1, 1);
        let closed_permit = cb.try_acquire().unwrap();
        assert!(!closed_permit.is_probe());

        cb.record_failure();
        tokio::time::advance(Duration::from_secs(1)).await;
        let trial = cb.try_acquire().unwrap();
        assert!(trial.is_probe());
        assert_ne!(trial.generation(), closed_permit.generation());

        // late results from before the circuit opened are dropped
        cb.complete(closed_permit, Outcome::Success);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.complete(closed_permit, Outcome::Failure);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.complete(closed_permit, Outcome::Abandoned);
        assert!(!cb.can_execute());

        cb.complete(trial, Outcome::Success);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_permit_outside_half_open_changes_nothing() {
        let cb = breaker(3, 1);
        let permit = cb.try_acquire().unwrap();
        cb.complete(permit, Outcome::Abandoned);
        assert_eq!(cb.counts(), Counts::default());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn huge_durations_do_not_overflow() {
        let cb = CircuitBreaker::new(
            "structure",
            BreakerSettings {
                failure_threshold: 1,
                success_threshold: 1,
                max_requests: 1,
                interval: Duration::MAX,
                timeout: Duration::MAX,
            },
        );
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        tokio::time::advance(Duration::from_secs(86_400)).await;
        assert!(!cb.can_execute());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn half_open_budget_holds_under_contention() {
        let cb = Arc::new(CircuitBreaker::new(
            "employee",
            BreakerSettings {
                failure_threshold: 1,
                success_threshold: 3,
                max_requests: 3,
                interval: Duration::from_secs(60),
                timeout: Duration::from_millis(20),
            },
        ));
        cb.record_failure();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let barrier = Arc::new(tokio::sync::Barrier::new(32));
        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let cb = cb.clone();
                let barrier = barrier.clone();
                tokio::spawn(async move {
                    barrier.wait().await;
                    (0..100).filter(|_| cb.can_execute()).count()
                })
            })
            .collect();

        let mut admitted = 0;
        for task in tasks {
            admitted += task.await.unwrap();
        }
        assert_eq!(admitted, 3);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.counts().requests, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_outcomes_are_all_counted() {
        let cb = Arc::new(breaker(u32::MAX, 1));
        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let cb = cb.clone();
                tokio::spawn(async move {
                    for _ in 0..500 {
                        let permit = cb.try_acquire().unwrap();
                        let outcome = if i % 2 == 0 {
                            Outcome::Success
                        } else {
                            Outcome::Failure
                        };
                        cb.complete(permit, outcome);
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        let counts = cb.counts();
        assert_eq!(counts.total_successes, 2_000);
        assert_eq!(counts.total_failures, 2_000);
        assert_eq!(cb.generation(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_half_open_results_decide_once() {
        let cb = Arc::new(CircuitBreaker::new(
            "chat",
            BreakerSettings {
                failure_threshold: 1,
                success_threshold: 1,
                max_requests: 8,
                interval: Duration::from_secs(60),
                timeout: Duration::from_millis(10),
            },
        ));
        cb.record_failure();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let permits: Vec<_> = (0..8).map(|_| cb.try_acquire().unwrap()).collect();
        let half_open = cb.generation();

        let tasks: Vec<_> = permits
            .into_iter()
            .enumerate()
            .map(|(i, permit)| {
                let cb = cb.clone();
                tokio::spawn(async move {
                    let outcome = if i % 2 == 0 {
                        Outcome::Success
                    } else {
                        Outcome::Failure
                    };
                    cb.complete(permit, outcome);
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        // the first result decides; every other one is from a dead generation
        assert_eq!(cb.generation(), half_open + 1);
        assert_ne!(cb.state(), CircuitState::HalfOpen);
    }
}
