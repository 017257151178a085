//! Relay event and envelope types exchanged with mothership.
//!
//! The outer event stream delivers [`RelayEvent`]s tagged by `type`.
//! GraphQL work arrives wrapped in a [`RelayEnvelope`] whose `body` is the
//! serialized request and whose `sha256` is the digest of that exact text.
//! Responses travel back in the same envelope shape.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::digest;
use crate::error::Error;

// ── Inner envelope type ──────────────────────────────────────────────

/// Kind of relayed GraphQL work carried by a [`RelayEnvelope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteGraphQlEventType {
    RemoteQueryEvent,
    RemoteMutationEvent,
    RemoteSubscriptionEvent,
    RemoteSubscriptionEventPing,
}

// ── RelayEnvelope ────────────────────────────────────────────────────

/// A digest-verified message unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayEnvelope {
    #[serde(rename = "type")]
    pub kind: RemoteGraphQlEventType,
    pub body: String,
    pub sha256: String,
}

impl RelayEnvelope {
    /// Build an envelope, computing the digest over `body`.
    pub fn seal(kind: RemoteGraphQlEventType, body: String) -> Self {
        let sha256 = digest::sha256_hex(&body);
        Self { kind, body, sha256 }
    }

    /// Build a response envelope correlated to `correlation_id`.
    pub fn response(
        kind: RemoteGraphQlEventType,
        correlation_id: &str,
        response: GraphQlResponse,
    ) -> Result<Self, Error> {
        let body = ResponseBody {
            id: correlation_id.to_owned(),
            response,
        };
        let text = serde_json::to_string(&body).map_err(|e| Error::Protocol(e.to_string()))?;
        Ok(Self::seal(kind, text))
    }

    /// Recompute the digest and compare it with the carried one.
    pub fn verify(&self) -> Result<(), Error> {
        digest::verify(&self.body, &self.sha256)
    }

    /// Decode the body as a relayed request.
    ///
    /// Callers must [`verify`](Self::verify) first.
    pub fn request(&self) -> Result<RelayedRequest, Error> {
        serde_json::from_str(&self.body).map_err(|e| Error::deserialization(&e, &self.body))
    }
}

// ── Request / response bodies ────────────────────────────────────────

/// Body of an inbound relay envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayedRequest {
    /// Correlation id chosen by mothership. Falls back to the envelope digest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    /// Explicit unsubscribe for a relayed subscription.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stop: bool,
}

impl RelayedRequest {
    /// Correlation id for this request: its own `id`, else the envelope digest.
    pub fn correlation_id(&self, envelope: &RelayEnvelope) -> String {
        self.id.clone().unwrap_or_else(|| envelope.sha256.clone())
    }

    /// Strip relay framing, leaving the plain GraphQL request.
    pub fn into_graphql(self) -> GraphQlRequest {
        GraphQlRequest {
            query: self.query,
            variables: self.variables,
            operation_name: self.operation_name,
        }
    }
}

/// A plain GraphQL request as sent to the local engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQlRequest {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
}

/// A GraphQL response: data, errors, or both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphQlResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQlError>,
}

impl GraphQlResponse {
    /// A response carrying a single error and no data.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            data: None,
            errors: vec![GraphQlError {
                message: message.into(),
                path: None,
                extensions: None,
            }],
        }
    }

    pub fn is_error(&self) -> bool {
        !self.errors.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQlError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<serde_json::Value>,
}

/// Body of an outbound relay response: correlation id plus the result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseBody {
    pub id: String,
    #[serde(flatten)]
    pub response: GraphQlResponse,
}

// ── Outer event stream ───────────────────────────────────────────────

/// Remote client flavour reported by mothership.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientType {
    Api,
    #[default]
    Dashboard,
}

/// Identity of a remote client session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    /// Remote session identifier (not the device API key).
    pub api_key: String,
    #[serde(rename = "type", default)]
    pub client_type: ClientType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteAccessAction {
    Init,
    Ack,
    Ping,
    End,
}

/// Explicit remote-access request (or acknowledgement) for one client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteAccessEvent {
    #[serde(rename = "type")]
    pub action: RemoteAccessAction,
    pub api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<AccessUrl>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum UrlType {
    Default,
    Lan,
    Mdns,
    Wan,
    Wireguard,
}

/// An address the device can be reached at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessUrl {
    #[serde(rename = "type")]
    pub kind: UrlType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<Url>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6: Option<Url>,
}

/// One event from the mothership event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RelayEvent {
    #[serde(rename = "CLIENT_CONNECTED_EVENT")]
    ClientConnected(ClientInfo),
    #[serde(rename = "CLIENT_DISCONNECTED_EVENT")]
    ClientDisconnected(ClientInfo),
    #[serde(rename = "CLIENT_PING_EVENT")]
    ClientPing(ClientInfo),
    #[serde(rename = "REMOTE_ACCESS_EVENT")]
    RemoteAccess(RemoteAccessEvent),
    #[serde(rename = "REMOTE_GRAPHQL_EVENT")]
    RemoteGraphQl(RelayEnvelope),
    #[serde(rename = "UPDATE_EVENT")]
    Update(serde_json::Value),
}

impl RelayEvent {
    /// Decode a raw event object.
    pub fn decode(raw: &serde_json::Value) -> Result<Self, Error> {
        serde_json::from_value(raw.clone()).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: raw.to_string(),
        })
    }

    /// Wire name of this event's type, for logging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::ClientConnected(_) => "CLIENT_CONNECTED_EVENT",
            Self::ClientDisconnected(_) => "CLIENT_DISCONNECTED_EVENT",
            Self::ClientPing(_) => "CLIENT_PING_EVENT",
            Self::RemoteAccess(_) => "REMOTE_ACCESS_EVENT",
            Self::RemoteGraphQl(_) => "REMOTE_GRAPHQL_EVENT",
            Self::Update(_) => "UPDATE_EVENT",
        }
    }
}

// ── Notifications ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Importance {
    Alert,
    Warning,
    Info,
}

/// A local notification pushed to mothership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub subject: String,
    pub description: String,
    pub importance: Importance,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

// ── Tests ────────────────────────────────────────────────────────────
