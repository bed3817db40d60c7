//! Error classification subsystem.
//!
//! # Data Flow
//! ```text
//! RpcError (remote status, transport, local resilience, cancellation)
//!     → classifier.rs (category, HTTP status, code, retryable)
//!     → logger.rs (one structured record per failed request)
//!     → envelope.rs (JSON body written to the client)
//! ```
//!
//! # Design Decisions
//! - Classification is a pure table lookup, shared by the retrier
//! - Errors are rendered once, where the retrier gives up
//! - The logging hook cannot fail the response

pub mod classifier;
pub mod envelope;
pub mod logger;

pub use classifier::{classify, Classification, ErrorClassifier, FailureCategory};
pub use envelope::{ErrorEnvelope, ErrorResponse};
pub use logger::{ErrorLogger, FailureRecord, TracingErrorLogger};
