use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Phase of the mothership connection.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionPhase {
    PreInit,
    Connecting,
    Connected,
    ErrorRetrying,
    PingFailure,
    /// Terminal: entered on `stop()`.
    Stopped,
}

/// Snapshot of the mothership connection.
///
/// `timeout_ms` is present only in `ERROR_RETRYING`; `error` is always
/// cleared on entering `CONNECTED`. Constructors enforce both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub phase: ConnectionPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When this phase was entered.
    pub since: DateTime<Utc>,
    /// Consecutive failed attempts since the last stable connection.
    #[serde(default)]
    pub attempt: u32,
}

impl ConnectionStatus {
    fn at(phase: ConnectionPhase) -> Self {
        Self {
            phase,
            timeout_ms: None,
            error: None,
            since: Utc::now(),
            attempt: 0,
        }
    }

    pub fn pre_init() -> Self {
        Self::at(ConnectionPhase::PreInit)
    }

    pub fn connecting(attempt: u32) -> Self {
        Self {
            attempt,
            ..Self::at(ConnectionPhase::Connecting)
        }
    }

    pub fn connected() -> Self {
        Self::at(ConnectionPhase::Connected)
    }

    pub fn error_retrying(error: impl Into<String>, timeout_ms: u64, attempt: u32) -> Self {
        Self {
            timeout_ms: Some(timeout_ms),
            error: Some(error.into()),
            attempt,
            ..Self::at(ConnectionPhase::ErrorRetrying)
        }
    }

    pub fn ping_failure(error: impl Into<String>, attempt: u32) -> Self {
        Self {
            error: Some(error.into()),
            attempt,
            ..Self::at(ConnectionPhase::PingFailure)
        }
    }

    pub fn stopped() -> Self {
        Self::at(ConnectionPhase::Stopped)
    }

    pub fn is_connected(&self) -> bool {
        self.phase == ConnectionPhase::Connected
    }

    /// Whole seconds until the next attempt, rounded up.
    pub fn reconnect_secs(&self) -> Option<u64> {
        self.timeout_ms.map(|ms| ms.div_ceil(1000))
    }

    /// One-line human description used by report surfaces.
    pub fn describe(&self) -> String {
        match self.phase {
            ConnectionPhase::PreInit => "not started".into(),
            ConnectionPhase::Connecting => "connecting".into(),
            ConnectionPhase::Connected => "CONNECTED".into(),
            ConnectionPhase::ErrorRetrying => match self.reconnect_secs() {
                Some(secs) => format!("reconnecting in {secs}s"),
                None => "reconnecting".into(),
            },
            ConnectionPhase::PingFailure => "ping failure".into(),
            ConnectionPhase::Stopped => "stopped".into(),
        }
    }
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::pre_init()
    }
}
