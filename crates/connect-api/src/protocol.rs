// ── graphql-transport-ws message set ──
//
// The mothership socket and the local subscription socket both speak the
// GraphQL-over-WebSocket protocol. Frames are JSON text tagged by `type`.

use serde::{Deserialize, Serialize};

use crate::envelope::{GraphQlError, GraphQlRequest, GraphQlResponse};
use crate::error::Error;

/// `Sec-WebSocket-Protocol` value for the protocol.
pub const SUBPROTOCOL: &str = "graphql-transport-ws";

/// Close codes the server uses to refuse a session.
pub mod close_code {
    pub const BAD_REQUEST: u16 = 4400;
    pub const UNAUTHORIZED: u16 = 4401;
    pub const FORBIDDEN: u16 = 4403;
    pub const INIT_TIMEOUT: u16 = 4408;
    pub const TOO_MANY_INIT: u16 = 4429;

    /// Whether a close code means the credentials were refused.
    pub fn is_auth(code: u16) -> bool {
        matches!(code, UNAUTHORIZED | FORBIDDEN)
    }
}

/// Frames sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    ConnectionInit {
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<serde_json::Value>,
    },
    Ping {
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<serde_json::Value>,
    },
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<serde_json::Value>,
    },
    Subscribe {
        id: String,
        payload: GraphQlRequest,
    },
    Complete {
        id: String,
    },
}

/// Frames sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    ConnectionAck {
        payload: Option<serde_json::Value>,
    },
    Ping {
        payload: Option<serde_json::Value>,
    },
    Pong {
        payload: Option<serde_json::Value>,
    },
    Next {
        id: String,
        payload: GraphQlResponse,
    },
    Error {
        id: String,
        payload: Vec<GraphQlError>,
    },
    Complete {
        id: String,
    },
}

impl ClientMessage {
    pub fn encode(&self) -> Result<String, Error> {
        serde_json::to_string(self).map_err(|e| Error::Protocol(e.to_string()))
    }
}

impl ServerMessage {
    pub fn decode(text: &str) -> Result<Self, Error> {
        serde_json::from_str(text).map_err(|e| Error::deserialization(&e, text))
    }
}
