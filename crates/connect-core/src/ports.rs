// ── Collaborator seams ──
//
// Everything the relay calls out to: the local GraphQL engine, the port
// forwarding provider, and the credential source. Implementations are
// injected at construction; nothing here reaches for global state.

use std::time::Duration;

use connect_api::{AccessUrl, GraphQlRequest, GraphQlResponse};
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use secrecy::SecretString;

use crate::error::CoreError;

// ── Local GraphQL ────────────────────────────────────────────────────

/// Identity relayed work runs under.
///
/// Always the device's own service identity: mothership authorizes the
/// remote caller before relaying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub principal: String,
    pub roles: Vec<String>,
}

impl AuthContext {
    pub fn service() -> Self {
        Self {
            principal: "connect".into(),
            roles: vec!["admin".into()],
        }
    }
}

/// Stream of results for one local subscription. Dropping it cancels.
pub type ResponseStream = BoxStream<'static, Result<GraphQlResponse, CoreError>>;

pub trait GraphQlExecutor: Send + Sync {
    /// Run a query or mutation.
    ///
    /// GraphQL errors belong in the returned response; `Err` means the
    /// request could not be executed at all.
    fn execute<'a>(
        &'a self,
        request: GraphQlRequest,
        auth: &'a AuthContext,
    ) -> BoxFuture<'a, Result<GraphQlResponse, CoreError>>;

    /// Open a subscription.
    fn subscribe(&self, request: GraphQlRequest, auth: &AuthContext) -> ResponseStream;
}

// ── Port forwarding ──────────────────────────────────────────────────

/// A UPNP mapping that must be renewed before `ttl` runs out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub id: String,
    pub external_port: u16,
    pub ttl: Duration,
}

/// An active forwarding, as handed to [`PortForwarder::close`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Forwarding {
    Static { port: u16 },
    Upnp(Lease),
}

impl Forwarding {
    /// External port the router forwards.
    pub fn port(&self) -> u16 {
        match self {
            Self::Static { port } => *port,
            Self::Upnp(lease) => lease.external_port,
        }
    }
}

pub trait PortForwarder: Send + Sync {
    /// Whether a UPNP gateway is available at all.
    fn supports_upnp(&self) -> bool;

    fn open_static(&self, port: u16) -> BoxFuture<'_, Result<AccessUrl, CoreError>>;

    fn open_upnp(&self, desired_port: u16) -> BoxFuture<'_, Result<(AccessUrl, Lease), CoreError>>;

    fn renew<'a>(&'a self, lease: &'a Lease) -> BoxFuture<'a, Result<(), CoreError>>;

    fn close<'a>(&'a self, forwarding: &'a Forwarding) -> BoxFuture<'a, Result<(), CoreError>>;
}

// ── Credentials ──────────────────────────────────────────────────────

/// Source of the device API key. Asked again on every connection attempt.
pub trait ApiKeyProvider: Send + Sync {
    fn api_key(&self) -> Result<SecretString, CoreError>;
}

/// A key fixed at construction.
#[derive(Clone)]
pub struct StaticApiKey(pub SecretString);

impl ApiKeyProvider for StaticApiKey {
    fn api_key(&self) -> Result<SecretString, CoreError> {
        Ok(self.0.clone())
    }
}
