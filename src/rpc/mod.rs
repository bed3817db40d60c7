//! Resilient RPC client layer.
//!
//! # Data Flow
//! ```text
//! handler
//!     → client.rs (ClientManager resolves the service's client)
//!     → resilience (breaker gate, timeout, retry with backoff)
//!     → connector.rs (tonic channel to the backend)
//!     → error.rs (status / transport failures as RpcError)
//! ```
//!
//! context.rs carries the inbound request's identifiers, deadline and
//! cancellation into every outbound call.

pub mod client;
pub mod connector;
pub mod context;
pub mod error;

pub use client::{
    CallAttempt, ClientManager, ConnectionStatus, HealthReport, HealthStatus, ServiceClient, ServiceHealth,
    StartupError,
};
pub use connector::{Connector, GrpcConnector};
pub use context::CallContext;
pub use error::{RpcCode, RpcError};
