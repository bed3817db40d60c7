//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → Probe each backend service (connector liveness probe)
//!     → Liveness recorded on the ClientManager slot
//!
//! Health surface (http/health.rs):
//!     ClientManager::health_report()
//!     → connection state + circuit state + liveness per service
//! ```
//!
//! # Design Decisions
//! - Probes never go through the circuit breaker and never feed it
//! - Health state is per-service, not global

pub mod active;

pub use active::HealthMonitor;
