//! Transport seam between the client manager and the network.

use std::future::Future;
use std::time::Duration;

use tokio::net::TcpStream;
use tonic::transport::{Channel, Endpoint};

use crate::config::BackendServiceConfig;
use crate::rpc::error::RpcError;

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Establishes, probes and releases backend connections.
///
/// A connection is cloned into every call, so it should be a cheap handle
/// over a shared transport (a tonic [`Channel`] is).
pub trait Connector: Send + Sync + 'static {
    type Connection: Clone + Send + Sync + 'static;

    fn connect(
        &self,
        service: &str,
        config: &BackendServiceConfig,
    ) -> impl Future<Output = Result<Self::Connection, RpcError>> + Send;

    /// Lightweight liveness check that does not need an established connection.
    fn probe(
        &self,
        service: &str,
        config: &BackendServiceConfig,
    ) -> impl Future<Output = Result<(), RpcError>> + Send;

    /// Release a connection. Called at most once per established connection.
    fn close(
        &self,
        service: &str,
        connection: &Self::Connection,
    ) -> impl Future<Output = ()> + Send {
        let _ = (service, connection);
        async {}
    }
}

/// Plaintext HTTP/2 gRPC channels via tonic.
#[derive(Debug, Clone, Default)]
pub struct GrpcConnector;

impl GrpcConnector {
    pub fn endpoint(config: &BackendServiceConfig) -> Result<Endpoint, RpcError> {
        let endpoint = Endpoint::from_shared(format!("http://{}", config.address))?
            .connect_timeout(config.timeout())
            .timeout(config.timeout())
            .tcp_nodelay(true)
            .tcp_keepalive(Some(KEEPALIVE_INTERVAL))
            .http2_keep_alive_interval(KEEPALIVE_INTERVAL)
            .keep_alive_timeout(KEEPALIVE_TIMEOUT)
            .keep_alive_while_idle(true);
        Ok(endpoint)
    }
}

impl Connector for GrpcConnector {
    type Connection = Channel;

    async fn connect(
        &self,
        service: &str,
        config: &BackendServiceConfig,
    ) -> Result<Channel, RpcError> {
        let unavailable = |reason: String| RpcError::ConnectionUnavailable {
            service: service.to_string(),
            reason,
        };

        let endpoint = Self::endpoint(config).map_err(|e| unavailable(e.to_string()))?;
        endpoint
            .connect()
            .await
            .map_err(|e| unavailable(e.to_string()))
    }

    async fn probe(&self, service: &str, config: &BackendServiceConfig) -> Result<(), RpcError> {
        match tokio::time::timeout(config.timeout(), TcpStream::connect(&config.address)).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => Err(RpcError::ConnectionUnavailable {
                service: service.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(RpcError::Timeout(config.timeout())),
        }
    }

    async fn close(&self, service: &str, _connection: &Channel) {
        // the channel's background task ends once the last clone is dropped
        tracing::debug!(service, "gRPC channel released");
    }
}
