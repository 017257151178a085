//! CLI error types with miette diagnostics.
//!
//! Maps config, core and wire errors into user-facing errors with
//! actionable help text and stable exit codes.

use miette::Diagnostic;
use thiserror::Error;

use connect_config::ConfigError;
use connect_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const CONFIG: i32 = 10;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach {target}: {reason}")]
    #[diagnostic(
        code(connect::connection_failed),
        help("Check network access and the endpoint in your config.\nRun: connect config show")
    )]
    ConnectionFailed { target: String, reason: String },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(connect::auth_failed),
        help("Verify the API key.\nStore a new one with: connect config set-key")
    )]
    AuthFailed { message: String },

    #[error("No {what} API key configured")]
    #[diagnostic(
        code(connect::no_credentials),
        help(
            "Store one with: connect config set-key{flag}\n\
             Or set {env} in the environment."
        )
    )]
    NoCredentials {
        what: &'static str,
        flag: &'static str,
        env: String,
    },

    // ── Status ───────────────────────────────────────────────────────
    #[error("No status snapshot in {dir}")]
    #[diagnostic(
        code(connect::no_snapshot),
        help("Start the relay with: connect run\nOr point at its state directory with --state-dir")
    )]
    NoSnapshot { dir: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(connect::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration file already exists at {path}")]
    #[diagnostic(
        code(connect::config_exists),
        help("Pass --force to overwrite it.")
    )]
    ConfigExists { path: String },

    #[error(transparent)]
    #[diagnostic(
        code(connect::config),
        help("Check the config file. Run: connect config path")
    )]
    Config(ConfigError),

    // ── Runtime ──────────────────────────────────────────────────────
    #[error(transparent)]
    #[diagnostic(code(connect::core))]
    Core(CoreError),

    #[error("IO error: {0}")]
    #[diagnostic(code(connect::io))]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::NoSnapshot { .. } => exit_code::NOT_FOUND,
            Self::Validation { .. } => exit_code::USAGE,
            Self::ConfigExists { .. } | Self::Config(_) => exit_code::CONFIG,
            Self::Core(e) => match e {
                CoreError::AuthenticationFailed { .. } => exit_code::AUTH,
                CoreError::ConnectionFailed { .. }
                | CoreError::MothershipDown { .. }
                | CoreError::Timeout { .. } => exit_code::CONNECTION,
                CoreError::Config { .. } => exit_code::CONFIG,
                _ => exit_code::GENERAL,
            },
            Self::Io(_) => exit_code::GENERAL,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NoCredentials { what } => Self::NoCredentials {
                what,
                flag: if what == "local" { " --local" } else { "" },
                env: if what == "local" {
                    "CONNECT_LOCAL_API_KEY".into()
                } else {
                    "CONNECT_DEVICE_API_KEY".into()
                },
            },
            other => Self::Config(other),
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::AuthenticationFailed { message } => Self::AuthFailed { message },
            CoreError::ConnectionFailed { reason } => Self::ConnectionFailed {
                target: "mothership".into(),
                reason,
            },
            other => Self::Core(other),
        }
    }
}

impl From<connect_api::Error> for CliError {
    fn from(err: connect_api::Error) -> Self {
        CoreError::from(err).into()
    }
}
