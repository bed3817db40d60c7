//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every backend service
//! - Record liveness on the client manager (logged on change, exported as a gauge)

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time;

use crate::config::HealthCheckConfig;
use crate::rpc::client::ClientManager;
use crate::rpc::connector::Connector;

pub struct HealthMonitor<C: Connector> {
    clients: Arc<ClientManager<C>>,
    config: HealthCheckConfig,
}

impl<C: Connector> HealthMonitor<C> {
    pub fn new(clients: Arc<ClientManager<C>>, config: HealthCheckConfig) -> Self {
        Self { clients, config }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(
            interval = self.config.interval_secs,
            services = self.clients.services().len(),
            "Health monitor starting"
        );

        let interval = Duration::from_secs(self.config.interval_secs.max(1));
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probe every service concurrently. Returns how many were live.
    pub async fn check_all(&self) -> usize {
        let probes = self
            .clients
            .services()
            .into_iter()
            .map(|service| self.clients.probe(service));
        let results = futures_util::future::join_all(probes).await;
        let live = results.iter().filter(|r| r.is_ok()).count();
        tracing::debug!(live, total = results.len(), "Health check round complete");
        live
    }
}
