//! Health endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::errors::{ErrorEnvelope, ErrorResponse};
use crate::http::request::RequestContext;
use crate::http::server::AppState;
use crate::rpc::connector::Connector;

/// `GET /health`: 200 when every service is healthy, 503 otherwise.
pub async fn health<C: Connector>(State(state): State<AppState<C>>) -> Response {
    let report = state.clients.health_report();
    let status = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report)).into_response()
}

/// `GET /health/{service}`: a single service entry.
pub async fn service_health<C: Connector>(
    State(state): State<AppState<C>>,
    ctx: RequestContext,
    Path(service): Path<String>,
) -> Response {
    match state.clients.service_health(&service) {
        Some(health) => {
            let status = if health.is_healthy() {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            (status, Json(health)).into_response()
        }
        None => ErrorResponse::new(
            StatusCode::NOT_FOUND,
            ErrorEnvelope::new(
                "unknown_service",
                format!("unknown backend service: {service}"),
                ctx.request_id,
                service,
                "health",
            ),
        )
        .into_response(),
    }
}
