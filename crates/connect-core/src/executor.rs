// Local GraphQL executor backed by the HTTP/WebSocket client.

use connect_api::{GraphQlRequest, GraphQlResponse, LocalGraphQlClient};
use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use tracing::trace;

use crate::error::CoreError;
use crate::ports::{AuthContext, GraphQlExecutor, ResponseStream};

/// [`GraphQlExecutor`] for the device's own GraphQL engine.
///
/// The client is built with the service API key, which is the identity
/// every relayed request runs under.
#[derive(Debug, Clone)]
pub struct LocalExecutor {
    client: LocalGraphQlClient,
}

impl LocalExecutor {
    pub fn new(client: LocalGraphQlClient) -> Self {
        Self { client }
    }
}

impl GraphQlExecutor for LocalExecutor {
    fn execute<'a>(
        &'a self,
        request: GraphQlRequest,
        auth: &'a AuthContext,
    ) -> BoxFuture<'a, Result<GraphQlResponse, CoreError>> {
        Box::pin(async move {
            trace!(principal = %auth.principal, "local execute");
            self.client.execute(&request).await.map_err(CoreError::from)
        })
    }

    fn subscribe(&self, request: GraphQlRequest, auth: &AuthContext) -> ResponseStream {
        trace!(principal = %auth.principal, "local subscribe");
        self.client
            .subscribe(request)
            .map(|item| item.map_err(CoreError::from))
            .boxed()
    }
}
