//! Outbound call context.
//!
//! A `CallContext` is what crosses the HTTP→RPC boundary: the identifiers of
//! the originating request, the caller's deadline and a cancellation token.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tonic::metadata::{Ascii, MetadataMap, MetadataValue};

use crate::http::request::RequestContext;
use crate::rpc::error::RpcError;

/// Metadata keys carried on every outbound call.
pub const METADATA_REQUEST_ID: &str = "request-id";
pub const METADATA_TRACE_ID: &str = "trace-id";
pub const METADATA_USER_ID: &str = "user-id";
pub const METADATA_TIMESTAMP: &str = "timestamp";

#[derive(Debug, Clone)]
pub struct CallContext {
    request: RequestContext,
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl CallContext {
    pub fn new(request: RequestContext) -> Self {
        Self {
            request,
            deadline: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Set an absolute deadline for the whole logical call, retries included.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Deadline `timeout` from now. A timeout too large to represent leaves
    /// the call without a deadline.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self,
        }
    }

    /// Tie this call to an existing token (e.g. a request-scoped one).
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn request(&self) -> &RequestContext {
        &self.request
    }

    pub fn request_id(&self) -> &str {
        &self.request.request_id
    }

    pub fn trace_id(&self) -> &str {
        &self.request.trace_id
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Time left before the deadline, if one is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Returns the pending cancellation, if the caller already gave up.
    pub fn check(&self) -> Result<(), RpcError> {
        if self.cancel.is_cancelled() {
            return Err(RpcError::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(RpcError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Resolves when the caller cancels or the deadline passes, yielding the
    /// matching error. Never resolves for an unbounded, uncanceled call.
    pub async fn cancelled(&self) -> RpcError {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.cancel.cancelled() => RpcError::Canceled,
                    _ = tokio::time::sleep_until(deadline) => RpcError::DeadlineExceeded,
                }
            }
            None => {
                self.cancel.cancelled().await;
                RpcError::Canceled
            }
        }
    }

    /// Transport metadata carrying the request identifiers.
    pub fn metadata(&self) -> MetadataMap {
        let mut map = MetadataMap::new();
        insert_ascii(&mut map, METADATA_REQUEST_ID, &self.request.request_id);
        insert_ascii(&mut map, METADATA_TRACE_ID, &self.request.trace_id);
        if let Some(user_id) = &self.request.user_id {
            insert_ascii(&mut map, METADATA_USER_ID, user_id);
        }
        insert_ascii(
            &mut map,
            METADATA_TIMESTAMP,
            &chrono::Utc::now().timestamp().to_string(),
        );
        map
    }

    /// Wrap a message into a gRPC request with metadata and the per-call
    /// timeout (bounded by the remaining deadline).
    pub fn grpc_request<T>(&self, message: T, call_timeout: Duration) -> tonic::Request<T> {
        let mut request = tonic::Request::new(message);
        *request.metadata_mut() = self.metadata();
        let timeout = match self.remaining() {
            Some(remaining) => remaining.min(call_timeout),
            None => call_timeout,
        };
        request.set_timeout(timeout);
        request
    }
}

fn insert_ascii(map: &mut MetadataMap, key: &'static str, value: &str) {
    match value.parse::<MetadataValue<Ascii>>() {
        Ok(value) => {
            map.insert(key, value);
        }
        Err(_) => tracing::debug!(key, "Dropping non-ASCII metadata value"),
    }
}
