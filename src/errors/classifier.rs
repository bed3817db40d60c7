//! Failure classification.
//!
//! One table maps every [`RpcError`] to a category, an HTTP status, a machine
//! code and a retry verdict. The retry verdict doubles as the "counts toward
//! the breaker" flag for transient remote failures.

use std::sync::Arc;

use axum::http::StatusCode;

use crate::errors::envelope::{ErrorEnvelope, ErrorResponse};
use crate::errors::logger::{ErrorLogger, FailureRecord, TracingErrorLogger};
use crate::http::request::RequestContext;
use crate::rpc::error::{RpcCode, RpcError};

/// Non-standard "client closed request" status.
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCategory {
    /// The caller sent something the backend rejected.
    Client,
    /// The backend is unreachable, overloaded or failing.
    TransientRemote,
    /// The gateway refused the call itself (open breaker, no connection).
    LocalResilience,
    /// The caller gave up.
    Canceled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub category: FailureCategory,
    pub status: StatusCode,
    pub code: &'static str,
    pub retryable: bool,
}

impl Classification {
    const fn new(
        category: FailureCategory,
        status: StatusCode,
        code: &'static str,
        retryable: bool,
    ) -> Self {
        Self {
            category,
            status,
            code,
            retryable,
        }
    }

    /// Only transient remote failures feed the circuit breaker.
    pub fn counts_toward_breaker(&self) -> bool {
        self.category == FailureCategory::TransientRemote
    }

    pub fn is_local(&self) -> bool {
        self.category == FailureCategory::LocalResilience
    }
}

fn client_closed_request() -> StatusCode {
    StatusCode::from_u16(CLIENT_CLOSED_REQUEST).unwrap_or(StatusCode::REQUEST_TIMEOUT)
}

/// Map a failure onto the taxonomy. Pure.
pub fn classify(err: &RpcError) -> Classification {
    use FailureCategory::*;

    match err {
        RpcError::Status { code, .. } => classify_code(*code),
        RpcError::Transport(_) => {
            Classification::new(TransientRemote, StatusCode::SERVICE_UNAVAILABLE, "unavailable", true)
        }
        RpcError::Timeout(_) => Classification::new(
            TransientRemote,
            StatusCode::GATEWAY_TIMEOUT,
            "deadline_exceeded",
            true,
        ),
        RpcError::CircuitOpen { .. } => Classification::new(
            LocalResilience,
            StatusCode::SERVICE_UNAVAILABLE,
            "circuit_breaker_open",
            false,
        ),
        RpcError::ConnectionUnavailable { .. } => Classification::new(
            LocalResilience,
            StatusCode::SERVICE_UNAVAILABLE,
            "connection_error",
            false,
        ),
        RpcError::Shutdown => Classification::new(
            LocalResilience,
            StatusCode::SERVICE_UNAVAILABLE,
            "service_unavailable",
            false,
        ),
        RpcError::UnknownService(_) => Classification::new(
            LocalResilience,
            StatusCode::INTERNAL_SERVER_ERROR,
            "unknown_service",
            false,
        ),
        RpcError::Canceled => {
            Classification::new(Canceled, client_closed_request(), "request_canceled", false)
        }
        RpcError::DeadlineExceeded => Classification::new(
            Canceled,
            StatusCode::GATEWAY_TIMEOUT,
            "deadline_exceeded",
            false,
        ),
    }
}

fn classify_code(code: RpcCode) -> Classification {
    use FailureCategory::*;

    let (category, status, retryable) = match code {
        RpcCode::Unavailable => (TransientRemote, StatusCode::SERVICE_UNAVAILABLE, true),
        RpcCode::DeadlineExceeded => (TransientRemote, StatusCode::GATEWAY_TIMEOUT, true),
        RpcCode::ResourceExhausted => (TransientRemote, StatusCode::TOO_MANY_REQUESTS, true),
        RpcCode::Aborted => (TransientRemote, StatusCode::CONFLICT, true),
        RpcCode::Internal | RpcCode::Unknown | RpcCode::DataLoss | RpcCode::Ok => {
            (TransientRemote, StatusCode::INTERNAL_SERVER_ERROR, true)
        }
        RpcCode::InvalidArgument | RpcCode::FailedPrecondition | RpcCode::OutOfRange => {
            (Client, StatusCode::BAD_REQUEST, false)
        }
        RpcCode::NotFound => (Client, StatusCode::NOT_FOUND, false),
        RpcCode::AlreadyExists => (Client, StatusCode::CONFLICT, false),
        RpcCode::PermissionDenied => (Client, StatusCode::FORBIDDEN, false),
        RpcCode::Unauthenticated => (Client, StatusCode::UNAUTHORIZED, false),
        RpcCode::Unimplemented => (Client, StatusCode::NOT_IMPLEMENTED, false),
        RpcCode::Cancelled => (Canceled, client_closed_request(), false),
    };
    let code = match code {
        // an OK status should never surface as an error
        RpcCode::Ok => "internal",
        other => other.as_str(),
    };
    Classification::new(category, status, code, retryable)
}

/// Renders classified failures as HTTP error responses and reports them to
/// the injected logger.
#[derive(Clone)]
pub struct ErrorClassifier {
    logger: Arc<dyn ErrorLogger>,
}

impl std::fmt::Debug for ErrorClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorClassifier").finish_non_exhaustive()
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(Arc::new(TracingErrorLogger))
    }
}

impl ErrorClassifier {
    pub fn new(logger: Arc<dyn ErrorLogger>) -> Self {
        Self { logger }
    }

    pub fn classify(&self, err: &RpcError) -> Classification {
        classify(err)
    }

    /// Build the error response for a failed call and log it once.
    pub fn render(
        &self,
        err: &RpcError,
        ctx: &RequestContext,
        service: &str,
        method: &str,
    ) -> ErrorResponse {
        let classification = classify(err);
        self.logger.log_failure(&FailureRecord {
            context: ctx,
            service,
            method,
            error: err,
            classification: &classification,
        });

        let envelope = ErrorEnvelope::new(
            classification.code,
            public_message(err, &classification),
            &ctx.request_id,
            service,
            method,
        );
        ErrorResponse::new(classification.status, envelope)
    }
}

fn public_message(err: &RpcError, classification: &Classification) -> String {
    match err {
        RpcError::Status { message, .. } if !message.is_empty() => message.clone(),
        RpcError::CircuitOpen { .. } => "Service temporarily unavailable".to_string(),
        RpcError::ConnectionUnavailable { service, .. } => {
            format!("{service} service is currently unavailable")
        }
        _ => match classification.category {
            FailureCategory::TransientRemote if classification.status == StatusCode::GATEWAY_TIMEOUT => {
                "Upstream service timed out".to_string()
            }
            _ => err.to_string(),
        },
    }
}
