//! Edge gateway: HTTP front door with a resilient RPC client layer.

pub mod config;
pub mod errors;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod rpc;

pub use config::GatewayConfig;
pub use http::GatewayServer;
pub use lifecycle::Shutdown;
pub use rpc::{ClientManager, RpcError};
