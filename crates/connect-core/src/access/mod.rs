// ── Dynamic remote access ──
//
// Decides whether the device is reachable from the WAN and drives the
// port forwarding provider accordingly. The method is picked by
// `select_method`, a total function of policy and provider capability;
// the coordinator task owns every transition.

mod coordinator;
mod retry;

use connect_api::{ClientInfo, RemoteAccessEvent};

pub use coordinator::{CoordinatorTask, RemoteAccessCoordinator};

use crate::error::CoreError;
use crate::model::AccessType;

/// Inputs to the coordinator, delivered in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum AccessTrigger {
    ClientConnected(ClientInfo),
    ClientDisconnected(ClientInfo),
    ClientPing(ClientInfo),
    RemoteAccess(RemoteAccessEvent),
}

/// How to open WAN access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMethod {
    Static { port: u16 },
    Upnp { desired_port: u16 },
}

impl AccessMethod {
    pub fn access_type(self) -> AccessType {
        match self {
            Self::Static { .. } => AccessType::Static,
            Self::Upnp { .. } => AccessType::Upnp,
        }
    }
}

/// Pick the access method for `enabled` given what the provider supports.
///
/// `Ok(None)` means access is switched off by policy. A UPNP policy on a
/// network without a UPNP gateway is an error, never a silent fallback.
pub fn select_method(
    enabled: AccessType,
    upnp_available: bool,
    port: u16,
) -> Result<Option<AccessMethod>, CoreError> {
    match (enabled, upnp_available) {
        (AccessType::Disabled, _) => Ok(None),
        (AccessType::Static, _) => Ok(Some(AccessMethod::Static { port })),
        (AccessType::Upnp, true) => Ok(Some(AccessMethod::Upnp { desired_port: port })),
        (AccessType::Upnp, false) => Err(CoreError::AccessUnavailable {
            requested: AccessType::Upnp,
            reason: "no UPNP gateway found on this network".into(),
        }),
    }
}
