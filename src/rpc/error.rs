//! Remote call failures.
//!
//! `RpcCode` is a transport-independent copy of the canonical RPC status
//! codes; `RpcError` adds the failures produced locally by the resilience
//! layer (open breaker, missing connection, caller cancellation).

use std::fmt;
use std::time::Duration;

/// Canonical RPC status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcCode {
    Ok,
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl RpcCode {
    /// Snake-case name used as the machine code in error envelopes.
    pub fn as_str(&self) -> &'static str {
        match self {
            RpcCode::Ok => "ok",
            RpcCode::Cancelled => "cancelled",
            RpcCode::Unknown => "unknown",
            RpcCode::InvalidArgument => "invalid_argument",
            RpcCode::DeadlineExceeded => "deadline_exceeded",
            RpcCode::NotFound => "not_found",
            RpcCode::AlreadyExists => "already_exists",
            RpcCode::PermissionDenied => "permission_denied",
            RpcCode::ResourceExhausted => "resource_exhausted",
            RpcCode::FailedPrecondition => "failed_precondition",
            RpcCode::Aborted => "aborted",
            RpcCode::OutOfRange => "out_of_range",
            RpcCode::Unimplemented => "unimplemented",
            RpcCode::Internal => "internal",
            RpcCode::Unavailable => "unavailable",
            RpcCode::DataLoss => "data_loss",
            RpcCode::Unauthenticated => "unauthenticated",
        }
    }
}

impl fmt::Display for RpcCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<tonic::Code> for RpcCode {
    fn from(code: tonic::Code) -> Self {
        match code {
            tonic::Code::Ok => RpcCode::Ok,
            tonic::Code::Cancelled => RpcCode::Cancelled,
            tonic::Code::Unknown => RpcCode::Unknown,
            tonic::Code::InvalidArgument => RpcCode::InvalidArgument,
            tonic::Code::DeadlineExceeded => RpcCode::DeadlineExceeded,
            tonic::Code::NotFound => RpcCode::NotFound,
            tonic::Code::AlreadyExists => RpcCode::AlreadyExists,
            tonic::Code::PermissionDenied => RpcCode::PermissionDenied,
            tonic::Code::ResourceExhausted => RpcCode::ResourceExhausted,
            tonic::Code::FailedPrecondition => RpcCode::FailedPrecondition,
            tonic::Code::Aborted => RpcCode::Aborted,
            tonic::Code::OutOfRange => RpcCode::OutOfRange,
            tonic::Code::Unimplemented => RpcCode::Unimplemented,
            tonic::Code::Internal => RpcCode::Internal,
            tonic::Code::Unavailable => RpcCode::Unavailable,
            tonic::Code::DataLoss => RpcCode::DataLoss,
            tonic::Code::Unauthenticated => RpcCode::Unauthenticated,
        }
    }
}

/// A failed remote call, as seen by the gateway.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RpcError {
    /// The backend answered with a non-OK status.
    #[error("{code}: {message}")]
    Status { code: RpcCode, message: String },

    /// The call never produced a status (connection reset, refused, ...).
    #[error("transport error: {0}")]
    Transport(String),

    /// A single attempt exceeded the per-call timeout.
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    /// The breaker for the service denied the call.
    #[error("circuit breaker is open for service {service}")]
    CircuitOpen { service: String },

    /// No connection to the service could be established.
    #[error("connection to service {service} unavailable: {reason}")]
    ConnectionUnavailable { service: String, reason: String },

    /// The client manager has been shut down.
    #[error("client manager is shut down")]
    Shutdown,

    /// The service name is not configured.
    #[error("unknown backend service: {0}")]
    UnknownService(String),

    /// The caller canceled the call.
    #[error("request canceled by caller")]
    Canceled,

    /// The caller's deadline passed.
    #[error("request deadline exceeded")]
    DeadlineExceeded,
}

impl RpcError {
    pub fn status(code: RpcCode, message: impl Into<String>) -> Self {
        RpcError::Status {
            code,
            message: message.into(),
        }
    }

    /// The remote status code, if the backend produced one.
    pub fn code(&self) -> Option<RpcCode> {
        match self {
            RpcError::Status { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// True for failures raised by the caller rather than the backend.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, RpcError::Canceled | RpcError::DeadlineExceeded)
    }
}

impl From<tonic::Status> for RpcError {
    fn from(status: tonic::Status) -> Self {
        RpcError::Status {
            code: status.code().into(),
            message: status.message().to_string(),
        }
    }
}

impl From<tonic::transport::Error> for RpcError {
    fn from(err: tonic::transport::Error) -> Self {
        RpcError::Transport(err.to_string())
    }
}
