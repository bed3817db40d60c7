//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, thresholds > 0, jitter in range)
//! - Validate backend addresses are `host:port`
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use thiserror::Error;

use crate::config::schema::{BackendServiceConfig, GatewayConfig};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("no backend services configured")]
    NoServices,

    #[error("listener bind address {0:?} is not host:port")]
    BindAddress(String),

    #[error("timeouts.request_secs must be greater than zero")]
    ZeroRequestTimeout,

    #[error("service {service}: address {address:?} is not host:port")]
    Address { service: String, address: String },

    #[error("service {service}: {field} must be greater than zero")]
    Zero { service: String, field: &'static str },

    #[error("service {service}: backoff_multiplier {value} must be at least 1.0")]
    Multiplier { service: String, value: f64 },

    #[error("service {service}: jitter {value} must be within [0, 1)")]
    Jitter { service: String, value: f64 },

    #[error("service {service}: retry_delay_ms exceeds max_retry_delay_ms")]
    DelayOrder { service: String },

    #[error("service {service}: success_threshold exceeds max_requests")]
    SuccessThreshold { service: String },
}

/// Validate the whole configuration, collecting every problem.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if !is_host_port(&config.listener.bind_address) {
        errors.push(ValidationError::BindAddress(
            config.listener.bind_address.clone(),
        ));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::ZeroRequestTimeout);
    }
    if config.services.is_empty() {
        errors.push(ValidationError::NoServices);
    }
    for (name, service) in &config.services {
        validate_service(name, service, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_service(name: &str, config: &BackendServiceConfig, errors: &mut Vec<ValidationError>) {
    let service = || name.to_string();

    if !is_host_port(&config.address) {
        errors.push(ValidationError::Address {
            service: service(),
            address: config.address.clone(),
        });
    }

    let breaker = &config.circuit_breaker;
    for (field, value) in [
        ("timeout_ms", config.timeout_ms),
        ("max_retry_delay_ms", config.max_retry_delay_ms),
        ("circuit_breaker.failure_threshold", breaker.failure_threshold as u64),
        ("circuit_breaker.success_threshold", breaker.success_threshold as u64),
        ("circuit_breaker.max_requests", breaker.max_requests as u64),
        ("circuit_breaker.timeout_secs", breaker.timeout_secs),
    ] {
        if value == 0 {
            errors.push(ValidationError::Zero {
                service: service(),
                field,
            });
        }
    }

    if config.backoff_multiplier.is_nan() || config.backoff_multiplier < 1.0 {
        errors.push(ValidationError::Multiplier {
            service: service(),
            value: config.backoff_multiplier,
        });
    }
    if !(0.0..1.0).contains(&config.jitter) {
        errors.push(ValidationError::Jitter {
            service: service(),
            value: config.jitter,
        });
    }
    if config.retry_delay_ms > config.max_retry_delay_ms {
        errors.push(ValidationError::DelayOrder { service: service() });
    }
    if breaker.success_threshold > breaker.max_requests {
        errors.push(ValidationError::SuccessThreshold { service: service() });
    }
}

fn is_host_port(address: &str) -> bool {
    match address.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok_and(|p| p != 0),
        None => false,
    }
}
