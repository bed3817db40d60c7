//! Configuration loading from disk and the environment.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use thiserror::Error;

use crate::config::schema::{BackendServiceConfig, GatewayConfig};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file, with environment
/// overrides applied on top.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let mut config: GatewayConfig = toml::from_str(&content)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Built-in defaults plus environment overrides, validated.
pub fn load_from_env() -> Result<GatewayConfig, ConfigError> {
    let mut config = GatewayConfig::default();
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Apply overrides from `lookup`. Per-service keys are prefixed with the
/// upper-cased service name (`EMPLOYEE_SERVICE_ADDRESS`, `CHAT_MAX_RETRIES`).
/// Values that do not parse are ignored.
pub fn apply_env_overrides<F>(config: &mut GatewayConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(addr) = non_empty(lookup("GATEWAY_BIND_ADDRESS")) {
        config.listener.bind_address = addr;
    }
    if let Some(level) = non_empty(lookup("LOG_LEVEL")) {
        config.observability.log_level = level;
    }
    override_parsed(&lookup, "LOG_FORMAT", &mut config.observability.log_format);
    override_parsed(&lookup, "GATEWAY_REQUEST_TIMEOUT_SECS", &mut config.timeouts.request_secs);

    for (name, service) in config.services.iter_mut() {
        apply_service_overrides(&name.to_ascii_uppercase(), service, &lookup);
    }
}

fn apply_service_overrides<F>(prefix: &str, service: &mut BackendServiceConfig, lookup: &F)
where
    F: Fn(&str) -> Option<String>,
{
    let key = |suffix: &str| format!("{prefix}_{suffix}");

    if let Some(addr) = non_empty(lookup(&key("SERVICE_ADDRESS"))) {
        service.address = addr;
    }
    override_parsed(lookup, &key("TIMEOUT_MS"), &mut service.timeout_ms);
    override_parsed(lookup, &key("MAX_RETRIES"), &mut service.max_retries);
    override_parsed(lookup, &key("RETRY_DELAY_MS"), &mut service.retry_delay_ms);
    override_parsed(lookup, &key("MAX_RETRY_DELAY_MS"), &mut service.max_retry_delay_ms);
    override_parsed(lookup, &key("BACKOFF_MULTIPLIER"), &mut service.backoff_multiplier);

    let breaker = &mut service.circuit_breaker;
    override_parsed(lookup, &key("CB_MAX_REQUESTS"), &mut breaker.max_requests);
    override_parsed(lookup, &key("CB_INTERVAL_SECS"), &mut breaker.interval_secs);
    override_parsed(lookup, &key("CB_TIMEOUT_SECS"), &mut breaker.timeout_secs);
}

fn override_parsed<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let Some(raw) = non_empty(lookup(key)) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *target = value,
        Err(_) => tracing::warn!(key, value = %raw, "Ignoring unparseable environment override"),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
