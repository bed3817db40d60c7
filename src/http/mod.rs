//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware stack)
//!     → request.rs (accept or generate request/trace IDs)
//!     → handler
//!         → dispatch.rs (backend call through the RPC layer)
//!         → errors (classified failure rendered as JSON envelope)
//!     → request.rs (IDs echoed on the response)
//!     → Send to client
//! ```

pub mod dispatch;
pub mod health;
pub mod request;
pub mod server;

pub use dispatch::Dispatcher;
pub use request::{propagate_context, RequestContext, X_REQUEST_ID, X_TRACE_ID, X_USER_ID};
pub use server::{build_router, AppState, GatewayServer};
