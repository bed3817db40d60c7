//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to backend:
//!     → circuit_breaker.rs (admit, or fail fast while open)
//!     → timeouts.rs (per-attempt timeout raced against caller deadline)
//!     → On transient failure: retries.rs (backoff.rs delay, try again)
//!     → circuit_breaker.rs (one outcome per logical call)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every backend attempt has a deadline
//! - Circuit breakers are per backend service, not global
//! - Retries are bounded and never outlive the caller

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;

pub use backoff::ExponentialBackoff;
pub use circuit_breaker::{BreakerSettings, CircuitBreaker, CircuitState, Counts, Outcome, Permit};
pub use retries::{Retrier, RetryAttempt, RetryPolicy};
