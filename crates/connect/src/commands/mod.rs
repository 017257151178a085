//! Command handlers.

pub mod config_cmd;
pub mod report;
pub mod run;

use std::path::PathBuf;

use connect_config::{Config, config_path, load_config_from};

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Config file path from `--config`, else the platform default.
pub fn resolve_path(global: &GlobalOpts) -> PathBuf {
    global.config.clone().unwrap_or_else(config_path)
}

/// Load config from the resolved path + environment.
pub fn load(global: &GlobalOpts) -> Result<(Config, PathBuf), CliError> {
    let path = resolve_path(global);
    let cfg = load_config_from(&path)?;
    Ok((cfg, path))
}
