//! Failure logging hook used by the classifier.

use crate::errors::classifier::{Classification, FailureCategory};
use crate::http::request::RequestContext;
use crate::rpc::error::RpcError;

/// Everything known about a failed call at the point it is rendered.
#[derive(Debug)]
pub struct FailureRecord<'a> {
    pub context: &'a RequestContext,
    pub service: &'a str,
    pub method: &'a str,
    pub error: &'a RpcError,
    pub classification: &'a Classification,
}

/// Sink for failure records. Implementations must not fail or panic.
pub trait ErrorLogger: Send + Sync {
    fn log_failure(&self, record: &FailureRecord<'_>);
}

/// Logs through `tracing`. Local resilience failures ("backend is down")
/// and remote rejections ("backend said no") use different messages so
/// they can be told apart in aggregation.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorLogger;

impl ErrorLogger for TracingErrorLogger {
    fn log_failure(&self, record: &FailureRecord<'_>) {
        let ctx = record.context;
        let class = record.classification;
        match class.category {
            FailureCategory::LocalResilience => tracing::warn!(
                request_id = %ctx.request_id,
                trace_id = %ctx.trace_id,
                service = record.service,
                method = record.method,
                code = class.code,
                error = %record.error,
                "Backend unavailable, call rejected locally"
            ),
            FailureCategory::TransientRemote => tracing::error!(
                request_id = %ctx.request_id,
                trace_id = %ctx.trace_id,
                service = record.service,
                method = record.method,
                code = class.code,
                status = class.status.as_u16(),
                error = %record.error,
                "Backend call failed"
            ),
            FailureCategory::Client => tracing::info!(
                request_id = %ctx.request_id,
                trace_id = %ctx.trace_id,
                service = record.service,
                method = record.method,
                code = class.code,
                status = class.status.as_u16(),
                error = %record.error,
                "Backend rejected request"
            ),
            FailureCategory::Canceled => tracing::debug!(
                request_id = %ctx.request_id,
                trace_id = %ctx.trace_id,
                service = record.service,
                method = record.method,
                code = class.code,
                "Call abandoned by caller"
            ),
        }
    }
}
