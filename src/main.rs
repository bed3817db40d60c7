//! Edge gateway binary.
//!
//! ```text
//!     Client Request        ┌──────────────────────────────────────────────┐
//!     ──────────────────────┼─▶ http (context ids, trace, timeout)         │
//!                           │        │                                     │
//!                           │        ▼                                     │
//!                           │   handler → dispatch                         │
//!                           │        │                                     │
//!                           │        ▼                                     │
//!                           │   rpc::ClientManager ──▶ circuit breaker     │
//!                           │        │                 retry + backoff     │
//!                           │        ▼                                     │
//!                           │   tonic channel ─────────────────────────────┼──▶ Backend
//!                           │                                              │    Service
//!     Client Response       │   errors (classify, log once, JSON envelope) │
//!     ◀─────────────────────┼──                                            │
//!                           └──────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use edge_gateway::config::{load_config, load_from_env};
use edge_gateway::http::GatewayServer;
use edge_gateway::lifecycle::wait_for_signal;
use edge_gateway::observability::{init_logging, init_metrics};

#[derive(Parser)]
#[command(name = "edge-gateway")]
#[command(about = "HTTP edge gateway for internal RPC services", long_about = None)]
struct Args {
    /// TOML configuration file; built-in defaults are used when omitted
    #[arg(short, long, env = "GATEWAY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => load_from_env()?,
    };

    init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "edge-gateway starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        services = config.services.len(),
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics exporter");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let server = GatewayServer::new(config);

    let clients = Arc::clone(&server.state().clients);
    if let Err(e) = clients.start().await {
        // services that failed stay lazy and are retried on first use
        tracing::warn!(error = %e, "Some backend services are not reachable yet");
    }

    server.run(listener, wait_for_signal()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
