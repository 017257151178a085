// ── Runtime relay configuration ──
//
// These types describe how the relay behaves at runtime: endpoints,
// timers, pool sizes. They never touch disk; connect-config builds them
// from the operator's file and hands them in.

use std::time::Duration;

use url::Url;

use crate::model::AccessType;

/// Reconnect backoff policy.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    pub base: Duration,
    pub max: Duration,
    /// Growth per consecutive failure.
    pub factor: u32,
    /// Multiplicative jitter half-width, e.g. `0.2` for ±20%.
    pub jitter: f64,
    /// A CONNECTED period at least this long resets the backoff.
    pub stability: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max: Duration::from_secs(30),
            factor: 2,
            jitter: 0.2,
            stability: Duration::from_secs(60),
        }
    }
}

/// Supervisor and dispatcher settings.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub endpoint: Url,
    pub backoff: BackoffConfig,
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    pub handshake_timeout: Duration,
    /// Concurrent relayed query/mutation executions.
    pub workers: usize,
    /// Relayed requests admitted to wait for a free worker. Past this,
    /// requests are answered with a "relay busy" error.
    pub backlog: usize,
    pub execute_timeout: Duration,
    /// A relayed subscription without a keepalive for this long is ended.
    pub subscription_keepalive: Duration,
}

impl RelayConfig {
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            backoff: BackoffConfig::default(),
            ping_interval: Duration::from_secs(30),
            ping_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(15),
            workers: 8,
            backlog: 256,
            execute_timeout: Duration::from_secs(30),
            subscription_keepalive: Duration::from_secs(60),
        }
    }
}

/// Dynamic remote access settings.
#[derive(Debug, Clone)]
pub struct RemoteAccessConfig {
    pub enabled_type: AccessType,
    /// WAN port for STATIC, desired external port for UPNP.
    pub wan_port: u16,
    /// Delay after the last client leaves before access is torn down.
    pub idle_grace: Duration,
    /// A client without a ping for this long is considered gone.
    pub client_timeout: Duration,
    pub sweep_interval: Duration,
    pub lease_renew_interval: Duration,
    /// Attempts per port forwarding call before the error sticks.
    pub retry_attempts: u32,
    pub retry_base: Duration,
    /// Timeout for every port forwarding call.
    pub call_timeout: Duration,
}

impl Default for RemoteAccessConfig {
    fn default() -> Self {
        Self {
            enabled_type: AccessType::Disabled,
            wan_port: 443,
            idle_grace: Duration::from_secs(300),
            client_timeout: Duration::from_secs(120),
            sweep_interval: Duration::from_secs(30),
            lease_renew_interval: Duration::from_secs(1800),
            retry_attempts: 3,
            retry_base: Duration::from_secs(1),
            call_timeout: Duration::from_secs(10),
        }
    }
}

/// Everything [`Connect`](crate::Connect) needs.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    pub relay: RelayConfig,
    pub remote_access: RemoteAccessConfig,
}
