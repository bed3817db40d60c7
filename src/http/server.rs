//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the health surface and any domain routes
//! - Wire up middleware (context propagation, tracing, request timeout)
//! - Bind server to listener
//! - Run the health monitor alongside the server
//! - Release backend connections once the server has drained

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{middleware, routing::get, Router};
use tokio::net::TcpListener;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::GatewayConfig;
use crate::errors::ErrorClassifier;
use crate::health::HealthMonitor;
use crate::http::dispatch::Dispatcher;
use crate::http::health;
use crate::http::request::propagate_context;
use crate::lifecycle::Shutdown;
use crate::rpc::client::ClientManager;
use crate::rpc::connector::{Connector, GrpcConnector};

/// Application state injected into handlers.
pub struct AppState<C: Connector = GrpcConnector> {
    pub config: Arc<GatewayConfig>,
    pub clients: Arc<ClientManager<C>>,
    pub dispatcher: Dispatcher<C>,
}

impl<C: Connector> Clone for AppState<C> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            clients: self.clients.clone(),
            dispatcher: self.dispatcher.clone(),
        }
    }
}

impl<C: Connector> AppState<C> {
    pub fn new(config: Arc<GatewayConfig>, clients: Arc<ClientManager<C>>) -> Self {
        Self::with_classifier(config, clients, ErrorClassifier::default())
    }

    pub fn with_classifier(
        config: Arc<GatewayConfig>,
        clients: Arc<ClientManager<C>>,
        classifier: ErrorClassifier,
    ) -> Self {
        let dispatcher = Dispatcher::new(clients.clone(), classifier, config.timeouts.request());
        Self {
            config,
            clients,
            dispatcher,
        }
    }
}

/// Build the Axum router with all middleware layers.
///
/// `routes` holds the domain handlers; they share the state and run behind
/// the same middleware as the health endpoints.
#[allow(deprecated)]
pub fn build_router<C: Connector>(state: AppState<C>, routes: Router<AppState<C>>) -> Router {
    // the dispatcher's own deadline fires first and renders a proper envelope
    let outer_timeout = state.config.timeouts.request().saturating_add(Duration::from_secs(1));

    Router::new()
        .route("/health", get(health::health::<C>))
        .route("/health/{service}", get(health::service_health::<C>))
        .merge(routes)
        .with_state(state)
        .layer(TimeoutLayer::new(outer_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(propagate_context))
}

/// HTTP server for the edge gateway.
pub struct GatewayServer<C: Connector = GrpcConnector> {
    state: AppState<C>,
    routes: Router<AppState<C>>,
    shutdown: Shutdown,
}

impl GatewayServer<GrpcConnector> {
    /// Create a server talking to the configured backends over gRPC.
    pub fn new(config: GatewayConfig) -> Self {
        let clients = Arc::new(ClientManager::from_config(&config));
        Self::with_clients(Arc::new(config), clients)
    }
}

impl<C: Connector> GatewayServer<C> {
    pub fn with_clients(config: Arc<GatewayConfig>, clients: Arc<ClientManager<C>>) -> Self {
        Self {
            state: AppState::new(config, clients),
            routes: Router::new(),
            shutdown: Shutdown::new(),
        }
    }

    /// Add domain routes.
    pub fn routes(mut self, routes: Router<AppState<C>>) -> Self {
        self.routes = self.routes.merge(routes);
        self
    }

    pub fn state(&self) -> &AppState<C> {
        &self.state
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone(), self.routes.clone())
    }

    /// Run the server until `signal` resolves or the shutdown handle is
    /// triggered, then drain and release backend connections.
    pub async fn run<S>(self, listener: TcpListener, signal: S) -> Result<(), std::io::Error>
    where
        S: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let monitor = HealthMonitor::new(
            self.state.clients.clone(),
            self.state.config.health_check.clone(),
        );
        let monitor_task = tokio::spawn(monitor.run(self.shutdown.subscribe()));

        let app = self.router();
        let shutdown = self.shutdown.clone();
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                tokio::select! {
                    _ = signal => {
                        shutdown.trigger();
                    }
                    _ = shutdown.wait() => {}
                }
            })
            .await;

        // stop background tasks even if serving failed
        self.shutdown.trigger();
        if let Err(e) = monitor_task.await {
            tracing::warn!(error = %e, "Health monitor task failed");
        }
        let released = self.state.clients.shutdown().await;
        tracing::info!(released, "HTTP server stopped");
        served
    }
}
