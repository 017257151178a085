use chrono::{DateTime, Utc};
use connect_api::{AccessUrl, ClientInfo, ClientType};
use serde::{Deserialize, Serialize};

/// Remote access method: the operator policy and the running state share it.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum AccessType {
    #[default]
    #[serde(alias = "disabled")]
    Disabled,
    #[serde(alias = "static")]
    Static,
    #[serde(alias = "upnp")]
    Upnp,
}

/// Dynamic remote access state.
///
/// `running_type` is only non-DISABLED while at least one client is live
/// (or during the idle grace period after the last one left).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteAccessState {
    pub enabled_type: AccessType,
    pub running_type: AccessType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<AccessUrl>,
    /// Number of live remote clients.
    #[serde(default)]
    pub clients: usize,
}

impl RemoteAccessState {
    pub fn new(enabled_type: AccessType) -> Self {
        Self {
            enabled_type,
            ..Self::default()
        }
    }

    pub fn is_running(&self) -> bool {
        self.running_type != AccessType::Disabled
    }
}

/// A live remote client session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConnectionRecord {
    pub api_key: String,
    pub client_type: ClientType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub last_seen_at: DateTime<Utc>,
}

impl ClientConnectionRecord {
    pub fn from_info(info: &ClientInfo) -> Self {
        Self {
            api_key: info.api_key.clone(),
            client_type: info.client_type,
            version: info.version.clone(),
            last_seen_at: Utc::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_seen_at = Utc::now();
    }
}
