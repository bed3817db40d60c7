//! Timeout enforcement.
//!
//! Every attempt runs under the service's per-call timeout and races the
//! caller's deadline and cancellation token. The two outcomes are distinct:
//! a per-attempt timeout is a transient backend failure, the caller's
//! deadline is an abandonment.

use std::future::Future;
use std::time::Duration;

use crate::rpc::context::CallContext;
use crate::rpc::error::RpcError;

/// Run one attempt. Dropping the attempt future cancels the in-flight call.
pub async fn run_attempt<T, Fut>(
    ctx: &CallContext,
    call_timeout: Duration,
    attempt: Fut,
) -> Result<T, RpcError>
where
    Fut: Future<Output = Result<T, RpcError>>,
{
    tokio::select! {
        biased;
        err = ctx.cancelled() => Err(err),
        result = tokio::time::timeout(call_timeout, attempt) => match result {
            Ok(outcome) => outcome,
            Err(_) => Err(RpcError::Timeout(call_timeout)),
        },
    }
}

/// Sleep for `delay` unless the caller gives up first.
pub async fn sleep_or_cancel(ctx: &CallContext, delay: Duration) -> Result<(), RpcError> {
    tokio::select! {
        biased;
        err = ctx.cancelled() => Err(err),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}
