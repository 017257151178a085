use thiserror::Error;

/// Top-level error type for the `connect-api` crate.
///
/// Covers every failure mode of the wire layer: the mothership WebSocket,
/// the graphql-ws handshake, envelope integrity, and the local GraphQL
/// endpoint. `connect-core` folds these into status strings and
/// user-facing diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── WebSocket ───────────────────────────────────────────────────
    /// WebSocket upgrade or socket I/O failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// WebSocket closed (by the server or the network).
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    /// The server refused the device API key during the handshake.
    #[error("Mothership rejected the API key: {reason}")]
    AuthRejected { reason: String },

    /// `connection_ack` did not arrive in time.
    #[error("Handshake timed out after {timeout_ms}ms")]
    HandshakeTimeout { timeout_ms: u64 },

    // ── Protocol ────────────────────────────────────────────────────
    /// A frame violated the graphql-ws protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// An envelope body did not match its sha256 digest.
    #[error("Digest mismatch: expected {expected}, computed {actual}")]
    DigestMismatch { expected: String, actual: String },

    /// JSON (de)serialization failed, with the raw text for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    // ── Local endpoint ──────────────────────────────────────────────
    /// HTTP transport error talking to the local GraphQL endpoint.
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// TLS setup error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// The local GraphQL server answered with a non-success HTTP status.
    #[error("GraphQL endpoint returned HTTP {status}: {message}")]
    GraphQl { status: u16, message: String },
}

impl Error {
    /// Returns `true` if the server refused our credentials.
    pub fn is_auth_rejected(&self) -> bool {
        matches!(self, Self::AuthRejected { .. })
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout { .. }
            | Self::HandshakeTimeout { .. }
            | Self::WebSocketConnect(_)
            | Self::WebSocketClosed { .. } => true,
            _ => false,
        }
    }

    pub(crate) fn deserialization(err: &serde_json::Error, body: &str) -> Self {
        Self::Deserialization {
            message: err.to_string(),
            body: body.to_owned(),
        }
    }
}
