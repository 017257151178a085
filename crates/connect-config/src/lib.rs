//! Operator configuration for the connect relay.
//!
//! TOML file + `CONNECT_*` environment, credential resolution (env +
//! keyring + plaintext), and translation to the runtime configs that
//! `connect_core::Connect` consumes.

mod credentials;

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use connect_api::{DeviceInfo, TlsMode, TransportConfig};
use connect_core::{AccessType, BackoffConfig, ConnectConfig, RelayConfig, RemoteAccessConfig};

pub use credentials::{
    KEYRING_SERVICE, KeyringApiKey, Secret, delete_secret, resolve_device_key, resolve_local_key,
    store_secret,
};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no {what} API key configured")]
    NoCredentials { what: &'static str },

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Where the daemon writes `status.json`. Defaults to the platform
    /// data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,

    #[serde(default)]
    pub mothership: MothershipSection,

    #[serde(default)]
    pub relay: RelaySection,

    #[serde(default)]
    pub remote_access: RemoteAccessSection,

    #[serde(default)]
    pub local: LocalSection,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MothershipSection {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Device API key (plaintext, prefer keyring or env var).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Environment variable holding the device API key.
    #[serde(default = "default_device_key_env")]
    pub api_key_env: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flash_guid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
}

impl Default for MothershipSection {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key: None,
            api_key_env: default_device_key_env(),
            flash_guid: None,
            server_name: None,
        }
    }
}

fn default_endpoint() -> String {
    "wss://mothership.unraid.net/ws".into()
}
fn default_device_key_env() -> String {
    "CONNECT_DEVICE_API_KEY".into()
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RelaySection {
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub backoff_factor: u32,
    pub backoff_jitter: f64,
    pub stability_secs: u64,
    pub ping_interval_secs: u64,
    pub ping_timeout_secs: u64,
    pub handshake_timeout_secs: u64,
    pub workers: usize,
    /// Relayed requests that may wait for a worker before new ones are
    /// answered "relay busy".
    pub backlog: usize,
    pub execute_timeout_secs: u64,
    pub subscription_keepalive_secs: u64,
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
            backoff_factor: 2,
            backoff_jitter: 0.2,
            stability_secs: 60,
            ping_interval_secs: 30,
            ping_timeout_secs: 10,
            handshake_timeout_secs: 15,
            workers: 8,
            backlog: 256,
            execute_timeout_secs: 30,
            subscription_keepalive_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RemoteAccessSection {
    /// `disabled`, `static` or `upnp`.
    pub mode: AccessType,
    pub wan_port: u16,
    /// Public host name or address used for STATIC access URLs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wan_host: Option<String>,
    pub idle_grace_secs: u64,
    pub client_timeout_secs: u64,
    pub lease_renew_secs: u64,
    pub retry_attempts: u32,
    pub call_timeout_secs: u64,
}

impl Default for RemoteAccessSection {
    fn default() -> Self {
        Self {
            mode: AccessType::Disabled,
            wan_port: 443,
            wan_host: None,
            idle_grace_secs: 300,
            client_timeout_secs: 120,
            lease_renew_secs: 1800,
            retry_attempts: 3,
            call_timeout_secs: 10,
        }
    }
}

/// The device's own GraphQL engine.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LocalSection {
    #[serde(default = "default_graphql_url")]
    pub graphql_url: String,

    /// Service API key (plaintext, prefer keyring or env var).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_local_key_env")]
    pub api_key_env: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert: Option<PathBuf>,

    /// Accept self-signed certificates.
    #[serde(default)]
    pub insecure: bool,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for LocalSection {
    fn default() -> Self {
        Self {
            graphql_url: default_graphql_url(),
            api_key: None,
            api_key_env: default_local_key_env(),
            ca_cert: None,
            insecure: false,
            timeout_secs: default_timeout(),
        }
    }
}

fn default_graphql_url() -> String {
    "http://127.0.0.1/graphql".into()
}
fn default_local_key_env() -> String {
    "CONNECT_LOCAL_API_KEY".into()
}
fn default_timeout() -> u64 {
    30
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("net", "unraid", "connect")
}

fn home_fallback(parts: &[&str]) -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.extend(parts);
    p
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || home_fallback(&[".config", "connect", "config.toml"]),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn default_state_dir() -> PathBuf {
    project_dirs().map_or_else(
        || home_fallback(&[".local", "share", "connect"]),
        |dirs| dirs.data_local_dir().to_path_buf(),
    )
}

// ── Loading / saving ────────────────────────────────────────────────

/// Load from the canonical config path + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` + environment. A missing file means defaults.
///
/// Nested keys come from the environment with `__` as separator, e.g.
/// `CONNECT_REMOTE_ACCESS__MODE=upnp`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let config = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("CONNECT_").split("__"))
        .extract()?;
    Ok(config)
}

/// Serialize to TOML and write to `path`, creating parent directories.
pub fn save_config(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Translation ─────────────────────────────────────────────────────

fn positive_secs(field: &str, secs: u64) -> Result<Duration, ConfigError> {
    if secs == 0 {
        return Err(invalid(field, "must be greater than zero"));
    }
    Ok(Duration::from_secs(secs))
}

impl Config {
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(default_state_dir)
    }

    /// The mothership endpoint; must be a `ws://` or `wss://` URL.
    pub fn endpoint(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.mothership.endpoint)
            .map_err(|e| invalid("mothership.endpoint", format!("{e}")))?;
        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(invalid(
                "mothership.endpoint",
                format!("expected a ws:// or wss:// URL, got '{other}://'"),
            )),
        }
    }

    pub fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            flash_guid: self.mothership.flash_guid.clone(),
            server_name: self.mothership.server_name.clone(),
            ..DeviceInfo::default()
        }
    }

    pub fn relay_config(&self) -> Result<RelayConfig, ConfigError> {
        let r = &self.relay;
        if r.backoff_factor == 0 {
            return Err(invalid("relay.backoff_factor", "must be at least 1"));
        }
        if !(0.0..1.0).contains(&r.backoff_jitter) {
            return Err(invalid("relay.backoff_jitter", "must be in [0, 1)"));
        }
        if r.backoff_base_ms == 0 || r.backoff_max_ms < r.backoff_base_ms {
            return Err(invalid(
                "relay.backoff_max_ms",
                "base must be non-zero and no larger than max",
            ));
        }
        if r.workers == 0 {
            return Err(invalid("relay.workers", "must be at least 1"));
        }

        Ok(RelayConfig {
            backoff: BackoffConfig {
                base: Duration::from_millis(r.backoff_base_ms),
                max: Duration::from_millis(r.backoff_max_ms),
                factor: r.backoff_factor,
                jitter: r.backoff_jitter,
                stability: Duration::from_secs(r.stability_secs),
            },
            ping_interval: positive_secs("relay.ping_interval_secs", r.ping_interval_secs)?,
            ping_timeout: positive_secs("relay.ping_timeout_secs", r.ping_timeout_secs)?,
            handshake_timeout: positive_secs(
                "relay.handshake_timeout_secs",
                r.handshake_timeout_secs,
            )?,
            workers: r.workers,
            backlog: r.backlog,
            execute_timeout: positive_secs("relay.execute_timeout_secs", r.execute_timeout_secs)?,
            subscription_keepalive: positive_secs(
                "relay.subscription_keepalive_secs",
                r.subscription_keepalive_secs,
            )?,
            ..RelayConfig::new(self.endpoint()?)
        })
    }

    pub fn remote_access_config(&self) -> Result<RemoteAccessConfig, ConfigError> {
        let ra = &self.remote_access;
        if ra.wan_port == 0 {
            return Err(invalid("remote_access.wan_port", "must be a valid port"));
        }
        Ok(RemoteAccessConfig {
            enabled_type: ra.mode,
            wan_port: ra.wan_port,
            idle_grace: Duration::from_secs(ra.idle_grace_secs),
            client_timeout: positive_secs(
                "remote_access.client_timeout_secs",
                ra.client_timeout_secs,
            )?,
            lease_renew_interval: positive_secs(
                "remote_access.lease_renew_secs",
                ra.lease_renew_secs,
            )?,
            retry_attempts: ra.retry_attempts.max(1),
            call_timeout: positive_secs("remote_access.call_timeout_secs", ra.call_timeout_secs)?,
            ..RemoteAccessConfig::default()
        })
    }

    pub fn connect_config(&self) -> Result<ConnectConfig, ConfigError> {
        Ok(ConnectConfig {
            relay: self.relay_config()?,
            remote_access: self.remote_access_config()?,
        })
    }

    pub fn local_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.local.graphql_url).map_err(|e| invalid("local.graphql_url", format!("{e}")))
    }

    pub fn local_transport(&self) -> TransportConfig {
        let tls = if self.local.insecure {
            TlsMode::DangerAcceptInvalid
        } else if let Some(ref ca) = self.local.ca_cert {
            TlsMode::CustomCa(ca.clone())
        } else {
            TlsMode::System
        };
        TransportConfig {
            tls,
            timeout: Duration::from_secs(self.local.timeout_secs.max(1)),
        }
    }
}
