//! Request context propagation.
//!
//! # Responsibilities
//! - Accept or generate the request ID and trace ID of every inbound request
//! - Make them available to handlers (extensions, extractor, accessors)
//! - Echo them on every response
//! - Hand them to outbound RPC calls via [`CallContext`]
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - Client-supplied IDs are accepted only if well-formed; anything else is
//!   replaced, never rejected
//! - Handlers run inside a span carrying both IDs

use std::convert::Infallible;

use axum::{
    body::Body,
    extract::FromRequestParts,
    http::{request::Parts, Extensions, HeaderMap, HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::rpc::context::CallContext;

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");
pub const X_TRACE_ID: HeaderName = HeaderName::from_static("x-trace-id");
pub const X_USER_ID: HeaderName = HeaderName::from_static("x-user-id");

/// Returned by the accessors when no context is attached.
pub const UNKNOWN: &str = "unknown";

const MAX_ID_LEN: usize = 128;

/// Correlation identifiers of one inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub request_id: String,
    pub trace_id: String,
    pub user_id: Option<String>,
}

impl RequestContext {
    /// Fresh context with newly generated IDs.
    pub fn generate() -> Self {
        Self {
            request_id: new_id(),
            trace_id: new_id(),
            user_id: None,
        }
    }

    /// Take well-formed IDs from the headers, generating the rest.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            request_id: header_id(headers, &X_REQUEST_ID).unwrap_or_else(new_id),
            trace_id: header_id(headers, &X_TRACE_ID).unwrap_or_else(new_id),
            user_id: header_id(headers, &X_USER_ID),
        }
    }

    /// 1 to 128 characters of `[A-Za-z0-9._:-]`.
    pub fn is_well_formed(id: &str) -> bool {
        !id.is_empty()
            && id.len() <= MAX_ID_LEN
            && id
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b':' | b'-'))
    }

    /// Outbound context for a call made on behalf of this request.
    pub fn call_context(&self, deadline: Option<Instant>) -> CallContext {
        let ctx = CallContext::new(self.clone());
        match deadline {
            Some(deadline) => ctx.with_deadline(deadline),
            None => ctx,
        }
    }

    /// Write the effective IDs into `headers`, replacing what was there.
    pub fn write_headers(&self, headers: &mut HeaderMap) {
        set_header(headers, X_REQUEST_ID, &self.request_id);
        set_header(headers, X_TRACE_ID, &self.trace_id);
    }
}

fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn header_id(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| RequestContext::is_well_formed(v))
        .map(str::to_string)
}

fn set_header(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => {
            headers.remove(name);
        }
    }
}

/// Middleware establishing the [`RequestContext`] for every request.
pub async fn propagate_context(mut req: Request<Body>, next: Next) -> Response {
    let ctx = RequestContext::from_headers(req.headers());

    ctx.write_headers(req.headers_mut());
    match &ctx.user_id {
        Some(user_id) => set_header(req.headers_mut(), X_USER_ID, user_id),
        None => {
            req.headers_mut().remove(X_USER_ID);
        }
    }
    req.extensions_mut().insert(ctx.clone());

    let span = tracing::info_span!(
        "request",
        request_id = %ctx.request_id,
        trace_id = %ctx.trace_id,
        method = %req.method(),
        path = %req.uri().path(),
    );

    let mut response = next.run(req).instrument(span).await;
    ctx.write_headers(response.headers_mut());
    response
}

pub fn request_id(extensions: &Extensions) -> &str {
    extensions
        .get::<RequestContext>()
        .map_or(UNKNOWN, |ctx| ctx.request_id.as_str())
}

pub fn trace_id(extensions: &Extensions) -> &str {
    extensions
        .get::<RequestContext>()
        .map_or(UNKNOWN, |ctx| ctx.trace_id.as_str())
}

pub fn user_id(extensions: &Extensions) -> &str {
    extensions
        .get::<RequestContext>()
        .and_then(|ctx| ctx.user_id.as_deref())
        .unwrap_or(UNKNOWN)
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .unwrap_or_else(|| RequestContext::from_headers(&parts.headers)))
    }
}
