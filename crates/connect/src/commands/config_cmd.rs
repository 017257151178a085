//! Config subcommand handlers.

use std::io::Read;
use std::path::Path;

use dialoguer::{Confirm, Input, Select};
use secrecy::SecretString;

use connect_config::{Config, Secret, delete_secret, save_config, store_secret};
use connect_core::AccessType;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

// ── Helpers ─────────────────────────────────────────────────────────

/// Mask plaintext keys before anything is printed.
fn redacted(cfg: &Config) -> Config {
    let mut cfg = cfg.clone();
    if cfg.mothership.api_key.is_some() {
        cfg.mothership.api_key = Some("****".into());
    }
    if cfg.local.api_key.is_some() {
        cfg.local.api_key = Some("****".into());
    }
    cfg
}

fn render_config(cfg: &Config, format: &OutputFormat) -> Result<String, CliError> {
    let render_err = |e: &dyn std::fmt::Display| CliError::Validation {
        field: "output".into(),
        reason: format!("cannot render config: {e}"),
    };
    match format {
        OutputFormat::Table => toml::to_string_pretty(cfg).map_err(|e| render_err(&e)),
        OutputFormat::Json => serde_json::to_string_pretty(cfg).map_err(|e| render_err(&e)),
        OutputFormat::JsonCompact => serde_json::to_string(cfg).map_err(|e| render_err(&e)),
        OutputFormat::Yaml => serde_yaml::to_string(cfg).map_err(|e| render_err(&e)),
    }
}

/// Map a dialoguer / interactive I/O failure into CliError.
fn prompt_err(e: impl std::fmt::Display) -> CliError {
    CliError::Validation {
        field: "interactive".into(),
        reason: format!("prompt failed: {e}"),
    }
}

fn secret_for(local: bool) -> (Secret, &'static str) {
    if local {
        (Secret::Local, "local API key")
    } else {
        (Secret::Device, "device API key")
    }
}

fn non_empty(key: String, field: &str) -> Result<SecretString, CliError> {
    let key = key.trim().to_owned();
    if key.is_empty() {
        return Err(CliError::Validation {
            field: field.into(),
            reason: "API key cannot be empty".into(),
        });
    }
    Ok(SecretString::from(key))
}

fn read_key(stdin: bool, label: &str) -> Result<SecretString, CliError> {
    let raw = if stdin {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        rpassword::prompt_password(format!("{label}: ")).map_err(prompt_err)?
    };
    non_empty(raw, "api_key")
}

// ── Init wizard ─────────────────────────────────────────────────────

fn wizard(path: &Path) -> Result<Config, CliError> {
    eprintln!("connect -- configuration wizard");
    eprintln!("   Config path: {}\n", path.display());

    let mut cfg = Config::default();

    cfg.mothership.endpoint = Input::new()
        .with_prompt("Mothership endpoint")
        .default(cfg.mothership.endpoint.clone())
        .interact_text()
        .map_err(prompt_err)?;

    cfg.local.graphql_url = Input::new()
        .with_prompt("Local GraphQL URL")
        .default(cfg.local.graphql_url.clone())
        .interact_text()
        .map_err(prompt_err)?;

    let modes = &["Disabled", "Static (router forwards the WAN port)"];
    let mode = Select::new()
        .with_prompt("Remote access")
        .items(modes)
        .default(0)
        .interact()
        .map_err(prompt_err)?;

    if mode == 1 {
        cfg.remote_access.mode = AccessType::Static;
        let host: String = Input::new()
            .with_prompt("Public hostname or address")
            .interact_text()
            .map_err(prompt_err)?;
        cfg.remote_access.wan_host = Some(host);
        cfg.remote_access.wan_port = Input::new()
            .with_prompt("WAN port")
            .default(cfg.remote_access.wan_port)
            .interact_text()
            .map_err(prompt_err)?;
    }

    let store = Confirm::new()
        .with_prompt("Store the device API key in the system keyring now?")
        .default(true)
        .interact()
        .map_err(prompt_err)?;
    if store {
        let key = read_key(false, "Device API key")?;
        store_secret(Secret::Device, &key)?;
        eprintln!("   device API key stored in system keyring");
    }

    Ok(cfg)
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            let path = super::resolve_path(global);
            output::print_output(&path.display().to_string(), global.quiet);
            Ok(())
        }

        ConfigCommand::Show => {
            let (cfg, _) = super::load(global)?;
            let rendered = render_config(&redacted(&cfg), &global.output)?;
            output::print_output(&rendered, global.quiet);
            Ok(())
        }

        ConfigCommand::Init { defaults, force } => {
            let path = super::resolve_path(global);
            if path.exists() && !force {
                return Err(CliError::ConfigExists {
                    path: path.display().to_string(),
                });
            }

            let cfg = if defaults {
                Config::default()
            } else {
                wizard(&path)?
            };
            save_config(&cfg, &path)?;

            if !global.quiet {
                eprintln!("Configuration written to {}", path.display());
            }
            Ok(())
        }

        ConfigCommand::SetKey { local, stdin } => {
            let (secret, label) = secret_for(local);
            let key = read_key(stdin, label)?;
            store_secret(secret, &key)?;
            if !global.quiet {
                eprintln!("{label} stored in system keyring");
            }
            Ok(())
        }

        ConfigCommand::DeleteKey { local } => {
            let (secret, label) = secret_for(local);
            delete_secret(secret)?;
            if !global.quiet {
                eprintln!("{label} removed from system keyring");
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn show_never_prints_plaintext_keys() {
        let mut cfg = Config::default();
        cfg.mothership.api_key = Some("device-secret".into());
        cfg.local.api_key = Some("local-secret".into());

        let text = render_config(&redacted(&cfg), &OutputFormat::Table).unwrap();
        assert!(!text.contains("device-secret"));
        assert!(!text.contains("local-secret"));
        assert!(text.contains("****"));
    }

    #[test]
    fn blank_key_is_rejected() {
        let err = non_empty("  \n".into(), "api_key").unwrap_err();
        assert!(matches!(err, CliError::Validation { .. }));
        assert!(non_empty("abc\n".into(), "api_key").is_ok());
    }
}
