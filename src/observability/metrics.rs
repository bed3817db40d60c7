//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_rpc_calls_total` (counter): calls by service, method, outcome
//! - `gateway_rpc_call_duration_seconds` (histogram): latency incl. retries
//! - `gateway_rpc_retries_total` (counter): retry attempts by service
//! - `gateway_circuit_breaker_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `gateway_circuit_breaker_transitions_total` (counter): by service, target state
//! - `gateway_backend_live` (gauge): 1=reachable, 0=unreachable
//!
//! Updates go through the `metrics` facade and are no-ops until a recorder
//! is installed.

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::resilience::circuit_breaker::CircuitState;

/// Install the Prometheus recorder with its own HTTP listener.
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_call(service: &str, method: &str, outcome: &'static str, elapsed: Duration) {
    metrics::counter!(
        "gateway_rpc_calls_total",
        "service" => service.to_string(),
        "method" => method.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    metrics::histogram!(
        "gateway_rpc_call_duration_seconds",
        "service" => service.to_string(),
        "method" => method.to_string()
    )
    .record(elapsed.as_secs_f64());
}

pub fn record_retry(service: &str) {
    metrics::counter!("gateway_rpc_retries_total", "service" => service.to_string()).increment(1);
}

pub fn set_breaker_state(service: &str, state: CircuitState) {
    metrics::gauge!("gateway_circuit_breaker_state", "service" => service.to_string())
        .set(state as u8 as f64);
}

pub fn record_breaker_transition(service: &str, to: CircuitState) {
    set_breaker_state(service, to);
    metrics::counter!(
        "gateway_circuit_breaker_transitions_total",
        "service" => service.to_string(),
        "to" => to.as_str()
    )
    .increment(1);
}

pub fn set_backend_live(service: &str, live: bool) {
    metrics::gauge!("gateway_backend_live", "service" => service.to_string())
        .set(if live { 1.0 } else { 0.0 });
}
