//! Clap derive structures for the `connect` CLI.
//!
//! Shared with build.rs for man page generation, so this file depends on
//! clap and clap_complete only.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// connect -- relay between this device and mothership
#[derive(Debug, Parser)]
#[command(
    name = "connect",
    version,
    about = "Keep this device connected to mothership and manage remote access",
    long_about = "Maintains the outbound mothership connection, relays remote GraphQL \
        work to the local engine, and opens WAN access on demand while remote \
        clients are connected.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "CONNECT_CONFIG_FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "CONNECT_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Log line format
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Remote access mode override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Disabled,
    Static,
    Upnp,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the relay until interrupted
    Run(RunArgs),

    /// Show the last status written by a running relay
    #[command(alias = "status")]
    Report(ReportArgs),

    /// Manage configuration and stored keys
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Run ──────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Mothership WebSocket endpoint (overrides config)
    #[arg(long, env = "CONNECT_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Remote access mode (overrides config)
    #[arg(long)]
    pub mode: Option<ModeArg>,

    /// Directory for status.json (overrides config)
    #[arg(long)]
    pub state_dir: Option<PathBuf>,
}

// ── Report ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ReportArgs {
    /// Directory holding status.json (overrides config)
    #[arg(long)]
    pub state_dir: Option<PathBuf>,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Create the config file with guided setup
    Init {
        /// Write defaults without prompting
        #[arg(long)]
        defaults: bool,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Display the resolved configuration (secrets redacted)
    Show,

    /// Store an API key in the system keyring
    SetKey {
        /// Store the local service key instead of the device key
        #[arg(long)]
        local: bool,

        /// Read the key from stdin instead of prompting
        #[arg(long)]
        stdin: bool,
    },

    /// Remove an API key from the system keyring
    DeleteKey {
        /// Remove the local service key instead of the device key
        #[arg(long)]
        local: bool,
    },

    /// Print the config file path
    Path,
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
