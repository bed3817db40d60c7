//! Handler-side glue for backend calls.
//!
//! Handlers resolve a client, run one logical call and either get the value
//! or a ready-to-send error response. Failures are classified and logged
//! exactly once, here.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::errors::{ErrorClassifier, ErrorResponse};
use crate::http::request::RequestContext;
use crate::rpc::client::{CallAttempt, ClientManager};
use crate::rpc::connector::{Connector, GrpcConnector};
use crate::rpc::error::RpcError;

pub struct Dispatcher<C: Connector = GrpcConnector> {
    clients: Arc<ClientManager<C>>,
    classifier: ErrorClassifier,
    request_timeout: Duration,
}

impl<C: Connector> Clone for Dispatcher<C> {
    fn clone(&self) -> Self {
        Self {
            clients: self.clients.clone(),
            classifier: self.classifier.clone(),
            request_timeout: self.request_timeout,
        }
    }
}

impl<C: Connector> std::fmt::Debug for Dispatcher<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl<C: Connector> Dispatcher<C> {
    pub fn new(
        clients: Arc<ClientManager<C>>,
        classifier: ErrorClassifier,
        request_timeout: Duration,
    ) -> Self {
        Self {
            clients,
            classifier,
            request_timeout,
        }
    }

    pub fn clients(&self) -> &Arc<ClientManager<C>> {
        &self.clients
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    /// Run `op` against `service` on behalf of the request in `ctx`.
    ///
    /// The whole call, retries included, is bounded by the request timeout.
    /// Dropping the returned future (client went away) abandons the call.
    pub async fn dispatch<T, F, Fut>(
        &self,
        ctx: &RequestContext,
        service: &str,
        method: &str,
        op: F,
    ) -> Result<T, ErrorResponse>
    where
        F: FnMut(CallAttempt<C::Connection>) -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        let call = ctx.call_context(Instant::now().checked_add(self.request_timeout));
        self.clients
            .call(&call, service, method, op)
            .await
            .map_err(|err| self.classifier.render(&err, ctx, service, method))
    }
}
