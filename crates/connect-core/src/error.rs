// ── Core error types ──
//
// Errors surfaced by connect-core. Transport faults never reach callers
// of the supervisor (they become status strings); these variants cover
// the call paths that do return errors: notification forwarding,
// collaborator calls, and configuration.

use thiserror::Error;

use crate::model::{AccessType, ConnectionPhase};

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Relay ────────────────────────────────────────────────────────
    /// The relay is not CONNECTED. Best-effort senders give up at once.
    #[error("mothership down (connection is {phase})")]
    MothershipDown { phase: ConnectionPhase },

    /// The outbound queue of the live link is full.
    #[error("relay outbound queue is full")]
    RelayBackpressure,

    #[error("Cannot connect to mothership: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// Malformed frame or envelope.
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    // ── Collaborators ────────────────────────────────────────────────
    /// A collaborator call did not finish in time.
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Port forwarding failed: {message}")]
    PortForwarding { message: String },

    /// The configured access method cannot be used here.
    #[error("{requested} remote access unavailable: {reason}")]
    AccessUnavailable {
        requested: AccessType,
        reason: String,
    },

    /// Local GraphQL execution failed below the GraphQL layer.
    #[error("Local execution failed: {message}")]
    Execution { message: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub(crate) fn timeout(operation: &str, timeout: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.to_owned(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<connect_api::Error> for CoreError {
    fn from(err: connect_api::Error) -> Self {
        use connect_api::Error as Api;

        match err {
            Api::AuthRejected { reason } => CoreError::AuthenticationFailed { message: reason },
            Api::WebSocketConnect(reason) => CoreError::ConnectionFailed { reason },
            Api::WebSocketClosed { code, reason } => CoreError::ConnectionFailed {
                reason: format!("closed with code {code}: {reason}"),
            },
            Api::HandshakeTimeout { timeout_ms } => CoreError::Timeout {
                operation: "mothership handshake".into(),
                timeout_ms,
            },
            Api::Timeout { timeout_secs } => CoreError::Timeout {
                operation: "local GraphQL request".into(),
                timeout_ms: timeout_secs.saturating_mul(1000),
            },
            Api::Protocol(message) => CoreError::Protocol { message },
            Api::DigestMismatch { expected, actual } => CoreError::Protocol {
                message: format!("digest mismatch: expected {expected}, computed {actual}"),
            },
            Api::Deserialization { message, body: _ } => CoreError::Protocol { message },
            Api::Transport(e) => CoreError::Execution {
                message: e.to_string(),
            },
            Api::GraphQl { status, message } => CoreError::Execution {
                message: format!("HTTP {status}: {message}"),
            },
            Api::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            Api::Tls(msg) => CoreError::Config {
                message: format!("TLS error: {msg}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mothership_down_names_phase() {
        let err = CoreError::MothershipDown {
            phase: ConnectionPhase::ErrorRetrying,
        };
        assert_eq!(err.to_string(), "mothership down (connection is ERROR_RETRYING)");
    }

    #[test]
    fn api_auth_rejection_maps_to_auth_failure() {
        let err: CoreError = connect_api::Error::AuthRejected {
            reason: "revoked".into(),
        }
        .into();
        assert!(matches!(err, CoreError::AuthenticationFailed { message } if message == "revoked"));
    }

    #[test]
    fn timeout_helper_reports_millis() {
        let err = CoreError::timeout("openUpnp", std::time::Duration::from_millis(1500));
        assert_eq!(err.to_string(), "openUpnp timed out after 1500ms");
    }
}
