//! Backend client management.
//!
//! # Responsibilities
//! - Own one lazily established connection per backend service
//! - Pair each connection with that service's circuit breaker and retrier
//! - Release every connection exactly once on shutdown
//!
//! # Design Decisions
//! - The service table is built once and never mutated
//! - Cached clients are read lock-free (`ArcSwapOption`); creation is
//!   serialized per service so the connector runs at most once under a race
//! - A failed connect is not cached; the next caller tries again

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::Instrument;

use crate::config::{BackendServiceConfig, GatewayConfig};
use crate::errors::classifier::classify;
use crate::observability::metrics;
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::resilience::retries::{Retrier, RetryAttempt, RetryPolicy};
use crate::rpc::connector::{Connector, GrpcConnector};
use crate::rpc::context::CallContext;
use crate::rpc::error::RpcError;

/// Handle to one connected backend service.
#[derive(Debug)]
pub struct ServiceClient<Conn> {
    name: Arc<str>,
    config: BackendServiceConfig,
    connection: Conn,
    retrier: Retrier,
}

impl<Conn: Clone> ServiceClient<Conn> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BackendServiceConfig {
        &self.config
    }

    pub fn connection(&self) -> &Conn {
        &self.connection
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        self.retrier.breaker()
    }

    /// Invoke `method` under the service's retry and breaker policy.
    /// `op` performs one attempt with the [`CallAttempt`] it is handed.
    pub async fn call<T, F, Fut>(&self, ctx: &CallContext, method: &str, mut op: F) -> Result<T, RpcError>
    where
        F: FnMut(CallAttempt<Conn>) -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        let started = Instant::now();
        let span = tracing::info_span!("rpc", service = %self.name, method);
        let result = self
            .retrier
            .execute(ctx, |attempt| {
                op(CallAttempt {
                    connection: self.connection.clone(),
                    context: ctx.clone(),
                    call_timeout: self.config.timeout(),
                    attempt,
                })
            })
            .instrument(span)
            .await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(err) => classify(err).code,
        };
        metrics::record_call(&self.name, method, outcome, started.elapsed());
        tracing::debug!(
            service = %self.name,
            method,
            request_id = %ctx.request_id(),
            outcome,
            elapsed = ?started.elapsed(),
            "Backend call finished"
        );
        result
    }
}

/// Everything one attempt needs to reach the backend.
#[derive(Debug, Clone)]
pub struct CallAttempt<Conn> {
    pub connection: Conn,
    pub context: CallContext,
    pub call_timeout: Duration,
    pub attempt: RetryAttempt,
}

impl<Conn> CallAttempt<Conn> {
    /// Wrap `message` with the caller's identifiers as metadata and the
    /// per-call timeout.
    pub fn request<M>(&self, message: M) -> tonic::Request<M> {
        self.context.grpc_request(message, self.call_timeout)
    }
}

/// Connection state reported by the health surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Ready,
    Disconnected,
    Unreachable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceHealth {
    pub address: String,
    pub connection: ConnectionStatus,
    pub circuit: CircuitState,
    /// Result of the latest liveness probe; `None` before the first one.
    pub live: Option<bool>,
}

impl ServiceHealth {
    pub fn is_healthy(&self) -> bool {
        self.connection == ConnectionStatus::Ready
            && self.live != Some(false)
            && self.circuit == CircuitState::Closed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub services: BTreeMap<String, ServiceHealth>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Services that could not be connected during [`ClientManager::start`].
#[derive(Debug, Error)]
#[error("failed to connect {} backend service(s): {}", .failures.len(), describe(.failures))]
pub struct StartupError {
    pub failures: Vec<(String, RpcError)>,
}

fn describe(failures: &[(String, RpcError)]) -> String {
    failures
        .iter()
        .map(|(service, err)| format!("{service} ({err})"))
        .collect::<Vec<_>>()
        .join(", ")
}

const LIVE_UNKNOWN: u8 = 0;
const LIVE_UP: u8 = 1;
const LIVE_DOWN: u8 = 2;

struct ServiceSlot<Conn> {
    name: Arc<str>,
    config: BackendServiceConfig,
    retrier: Retrier,
    client: ArcSwapOption<ServiceClient<Conn>>,
    init: tokio::sync::Mutex<()>,
    live: AtomicU8,
}

impl<Conn> ServiceSlot<Conn> {
    fn new(name: &str, config: BackendServiceConfig) -> Self {
        let name: Arc<str> = Arc::from(name);
        let breaker = Arc::new(CircuitBreaker::new(
            name.to_string(),
            config.circuit_breaker.settings(),
        ));
        let retrier = Retrier::new(name.clone(), RetryPolicy::from_config(&config), breaker);
        Self {
            name,
            config,
            retrier,
            client: ArcSwapOption::empty(),
            init: tokio::sync::Mutex::new(()),
            live: AtomicU8::new(LIVE_UNKNOWN),
        }
    }

    fn live(&self) -> Option<bool> {
        match self.live.load(Ordering::Acquire) {
            LIVE_UP => Some(true),
            LIVE_DOWN => Some(false),
            _ => None,
        }
    }
}

/// Process-wide owner of backend connections.
pub struct ClientManager<C: Connector = GrpcConnector> {
    connector: C,
    slots: HashMap<String, Arc<ServiceSlot<C::Connection>>>,
    closed: AtomicBool,
}

impl<C: Connector> std::fmt::Debug for ClientManager<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut services: Vec<_> = self.slots.keys().collect();
        services.sort();
        f.debug_struct("ClientManager")
            .field("services", &services)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl ClientManager<GrpcConnector> {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(&config.services, GrpcConnector)
    }
}

impl<C: Connector> ClientManager<C> {
    /// Build the service table. Performs no I/O.
    pub fn new(services: &BTreeMap<String, BackendServiceConfig>, connector: C) -> Self {
        let slots = services
            .iter()
            .map(|(name, config)| (name.clone(), Arc::new(ServiceSlot::new(name, config.clone()))))
            .collect();
        Self {
            connector,
            slots,
            closed: AtomicBool::new(false),
        }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Configured service names, sorted.
    pub fn services(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.slots.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn slot(&self, service: &str) -> Result<&Arc<ServiceSlot<C::Connection>>, RpcError> {
        self.slots
            .get(service)
            .ok_or_else(|| RpcError::UnknownService(service.to_string()))
    }

    /// Client for `service`, connecting on first use.
    pub async fn get_client(
        &self,
        service: &str,
    ) -> Result<Arc<ServiceClient<C::Connection>>, RpcError> {
        if self.is_shut_down() {
            return Err(RpcError::Shutdown);
        }
        let slot = self.slot(service)?;
        if let Some(client) = slot.client.load_full() {
            return Ok(client);
        }

        let _guard = slot.init.lock().await;
        if self.is_shut_down() {
            return Err(RpcError::Shutdown);
        }
        if let Some(client) = slot.client.load_full() {
            return Ok(client);
        }

        let connection = self.connect(slot).await?;
        let client = Arc::new(ServiceClient {
            name: slot.name.clone(),
            config: slot.config.clone(),
            connection,
            retrier: slot.retrier.clone(),
        });
        slot.client.store(Some(client.clone()));
        Ok(client)
    }

    async fn connect(&self, slot: &ServiceSlot<C::Connection>) -> Result<C::Connection, RpcError> {
        let timeout = slot.config.timeout();
        let result =
            tokio::time::timeout(timeout, self.connector.connect(&slot.name, &slot.config)).await;

        let err = match result {
            Ok(Ok(connection)) => {
                tracing::info!(
                    service = %slot.name,
                    address = %slot.config.address,
                    "Backend connection established"
                );
                return Ok(connection);
            }
            Ok(Err(RpcError::ConnectionUnavailable { reason, .. })) => reason,
            Ok(Err(other)) => other.to_string(),
            Err(_) => format!("connect timed out after {timeout:?}"),
        };

        tracing::warn!(
            service = %slot.name,
            address = %slot.config.address,
            error = %err,
            "Backend connection failed"
        );
        Err(RpcError::ConnectionUnavailable {
            service: slot.name.to_string(),
            reason: err,
        })
    }

    /// Eagerly connect every service. Failed services stay lazy.
    pub async fn start(&self) -> Result<(), StartupError> {
        let attempts = self.services().into_iter().map(|name| async move {
            let result = self.get_client(name).await;
            (name.to_string(), result)
        });
        let failures: Vec<_> = futures_util::future::join_all(attempts)
            .await
            .into_iter()
            .filter_map(|(name, result)| result.err().map(|err| (name, err)))
            .collect();

        if failures.is_empty() {
            tracing::info!(services = self.slots.len(), "All backend services connected");
            Ok(())
        } else {
            Err(StartupError { failures })
        }
    }

    /// Release all connections. Returns how many were released; later calls
    /// release nothing.
    pub async fn shutdown(&self) -> usize {
        if self.closed.swap(true, Ordering::AcqRel) {
            return 0;
        }

        let mut released = 0;
        for name in self.services() {
            let Some(slot) = self.slots.get(name) else {
                continue;
            };
            let _guard = slot.init.lock().await;
            if let Some(client) = slot.client.swap(None) {
                self.connector.close(&slot.name, &client.connection).await;
                released += 1;
            }
        }
        tracing::info!(released, "Backend connections released");
        released
    }

    /// Convenience wrapper: resolve the client and run one logical call.
    pub async fn call<T, F, Fut>(
        &self,
        ctx: &CallContext,
        service: &str,
        method: &str,
        op: F,
    ) -> Result<T, RpcError>
    where
        F: FnMut(CallAttempt<C::Connection>) -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        let client = self.get_client(service).await?;
        client.call(ctx, method, op).await
    }

    pub fn breaker(&self, service: &str) -> Option<&Arc<CircuitBreaker>> {
        self.slots.get(service).map(|slot| slot.retrier.breaker())
    }

    pub fn state(&self, service: &str) -> Option<CircuitState> {
        self.breaker(service).map(|b| b.state())
    }

    /// Run the connector's liveness probe and remember the result.
    pub async fn probe(&self, service: &str) -> Result<(), RpcError> {
        let slot = self.slot(service)?;
        let result = self.connector.probe(&slot.name, &slot.config).await;
        let live = result.is_ok();
        let previous = slot
            .live
            .swap(if live { LIVE_UP } else { LIVE_DOWN }, Ordering::AcqRel);

        metrics::set_backend_live(&slot.name, live);
        match (&result, previous) {
            (Ok(()), LIVE_DOWN) => {
                tracing::info!(service = %slot.name, "Backend reachable again")
            }
            (Err(err), LIVE_UP | LIVE_UNKNOWN) => tracing::warn!(
                service = %slot.name,
                address = %slot.config.address,
                error = %err,
                "Backend unreachable"
            ),
            _ => {}
        }
        result
    }

    pub fn service_health(&self, service: &str) -> Option<ServiceHealth> {
        let slot = self.slots.get(service)?;
        let live = slot.live();
        let connection = if slot.client.load().is_some() {
            ConnectionStatus::Ready
        } else if live == Some(false) {
            ConnectionStatus::Unreachable
        } else {
            ConnectionStatus::Disconnected
        };
        Some(ServiceHealth {
            address: slot.config.address.clone(),
            connection,
            circuit: slot.retrier.breaker().state(),
            live,
        })
    }

    /// Snapshot of every service. Performs no I/O.
    pub fn health_report(&self) -> HealthReport {
        let services: BTreeMap<_, _> = self
            .slots
            .keys()
            .filter_map(|name| Some((name.clone(), self.service_health(name)?)))
            .collect();
        let status = if services.values().all(ServiceHealth::is_healthy) {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };
        HealthReport { status, services }
    }
}
