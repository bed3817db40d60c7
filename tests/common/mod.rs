//! Shared utilities for integration testing.
//!
//! `ScriptedConnector` stands in for the network: each configured service
//! gets an in-memory backend whose replies are scripted per test.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tonic::metadata::MetadataMap;

use edge_gateway::config::{BackendServiceConfig, CircuitBreakerConfig};
use edge_gateway::rpc::{Connector, RpcCode, RpcError};

/// In-memory backend service.
#[derive(Debug)]
pub struct ScriptedBackend {
    calls: AtomicUsize,
    script: Mutex<VecDeque<Result<String, RpcError>>>,
    fallback: Mutex<Result<String, RpcError>>,
    delay: Mutex<Duration>,
    last_metadata: Mutex<Option<MetadataMap>>,
}

impl ScriptedBackend {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(Ok("ok".to_string())),
            delay: Mutex::new(Duration::ZERO),
            last_metadata: Mutex::new(None),
        }
    }

    /// Reply used once the script is exhausted.
    pub fn always(&self, reply: Result<&str, RpcError>) {
        *self.fallback.lock() = reply.map(str::to_string);
    }

    pub fn always_fail(&self, code: RpcCode) {
        self.always(Err(RpcError::status(code, format!("scripted {code}"))));
    }

    /// Queue one reply ahead of the fallback.
    pub fn then(&self, reply: Result<&str, RpcError>) {
        self.script.lock().push_back(reply.map(str::to_string));
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_metadata(&self) -> Option<MetadataMap> {
        self.last_metadata.lock().clone()
    }

    /// Handle one unary call.
    pub async fn invoke(&self, request: tonic::Request<String>) -> Result<String, RpcError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_metadata.lock() = Some(request.metadata().clone());

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.script.lock().pop_front();
        scripted.unwrap_or_else(|| self.fallback.lock().clone())
    }
}

#[derive(Debug, Default)]
struct Inner {
    backends: HashMap<String, Arc<ScriptedBackend>>,
    connects: AtomicUsize,
    closes: AtomicUsize,
    unreachable: AtomicBool,
}

/// Connector handing out [`ScriptedBackend`]s.
#[derive(Debug, Clone)]
pub struct ScriptedConnector {
    inner: Arc<Inner>,
}

impl ScriptedConnector {
    pub fn new(services: &[&str]) -> Self {
        let backends = services
            .iter()
            .map(|name| (name.to_string(), Arc::new(ScriptedBackend::new())))
            .collect();
        Self {
            inner: Arc::new(Inner {
                backends,
                ..Inner::default()
            }),
        }
    }

    pub fn backend(&self, service: &str) -> Arc<ScriptedBackend> {
        self.inner.backends[service].clone()
    }

    pub fn connects(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.inner.closes.load(Ordering::SeqCst)
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.inner.unreachable.store(unreachable, Ordering::SeqCst);
    }

    fn refuse(&self, service: &str) -> Option<RpcError> {
        self.inner
            .unreachable
            .load(Ordering::SeqCst)
            .then(|| RpcError::ConnectionUnavailable {
                service: service.to_string(),
                reason: "connection refused".into(),
            })
    }
}

impl Connector for ScriptedConnector {
    type Connection = Arc<ScriptedBackend>;

    async fn connect(
        &self,
        service: &str,
        _config: &BackendServiceConfig,
    ) -> Result<Arc<ScriptedBackend>, RpcError> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        if let Some(err) = self.refuse(service) {
            return Err(err);
        }
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        self.inner
            .backends
            .get(service)
            .cloned()
            .ok_or_else(|| RpcError::UnknownService(service.to_string()))
    }

    async fn probe(&self, service: &str, _config: &BackendServiceConfig) -> Result<(), RpcError> {
        match self.refuse(service) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn close(&self, _service: &str, _connection: &Arc<ScriptedBackend>) {
        self.inner.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Service table with fast, deterministic retry settings.
pub fn services(
    names: &[&str],
    max_retries: u32,
    breaker: CircuitBreakerConfig,
) -> BTreeMap<String, BackendServiceConfig> {
    names
        .iter()
        .map(|name| {
            let config = BackendServiceConfig {
                timeout_ms: 1_000,
                max_retries,
                retry_delay_ms: 10,
                max_retry_delay_ms: 100,
                jitter: 0.0,
                circuit_breaker: breaker.clone(),
                ..BackendServiceConfig::new(format!("{name}-service:9000"))
            };
            (name.to_string(), config)
        })
        .collect()
}
