//! `connect run`: the relay daemon.
//!
//! Wires the real collaborators into `Connect`, starts it, and rewrites
//! `status.json` on every connection or remote access transition until
//! SIGINT/SIGTERM.

use std::path::Path;
use std::sync::Arc;

use connect_api::{LocalGraphQlClient, MothershipConnector};
use connect_config::{KeyringApiKey, resolve_device_key, resolve_local_key};
use connect_core::{AccessType, Collaborators, Connect, LocalExecutor};
use tracing::{info, warn};

use crate::cli::{GlobalOpts, ModeArg, RunArgs};
use crate::error::CliError;
use crate::forwarder::StaticForwarder;

fn access_type(mode: ModeArg) -> AccessType {
    match mode {
        ModeArg::Disabled => AccessType::Disabled,
        ModeArg::Static => AccessType::Static,
        ModeArg::Upnp => AccessType::Upnp,
    }
}

pub async fn handle(args: RunArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let (mut cfg, path) = super::load(global)?;
    if let Some(endpoint) = args.endpoint {
        cfg.mothership.endpoint = endpoint;
    }
    if let Some(mode) = args.mode {
        cfg.remote_access.mode = access_type(mode);
    }
    if let Some(dir) = args.state_dir {
        cfg.state_dir = Some(dir);
    }

    let runtime = cfg.connect_config()?;

    // Fail at startup rather than on every reconnect.
    resolve_device_key(&cfg.mothership)?;
    let local_key = resolve_local_key(&cfg.local)?;

    let client = LocalGraphQlClient::new(cfg.local_url()?, local_key, &cfg.local_transport())?;
    let connector = MothershipConnector::new(cfg.device_info(), runtime.relay.handshake_timeout);

    let connect = Connect::new(
        runtime,
        Collaborators {
            connector: Arc::new(connector),
            executor: Arc::new(LocalExecutor::new(client)),
            forwarder: Arc::new(StaticForwarder::new(cfg.remote_access.wan_host.clone())),
            api_keys: Arc::new(KeyringApiKey::new(cfg.mothership.clone())),
        },
    );

    let state_dir = cfg.state_dir();
    info!(
        config = %path.display(),
        state_dir = %state_dir.display(),
        mode = %cfg.remote_access.mode,
        "starting relay"
    );

    connect.start().await;
    supervise(&connect, &state_dir).await;
    connect.stop().await;
    persist(&connect, &state_dir);

    Ok(())
}

async fn supervise(connect: &Connect, state_dir: &Path) {
    let mut status = connect.subscribe_status();
    let mut access = connect.subscribe_remote_access();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    persist(connect, state_dir);

    loop {
        tokio::select! {
            () = &mut shutdown => {
                info!("shutdown requested");
                break;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            changed = access.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
        persist(connect, state_dir);
    }
}

fn persist(connect: &Connect, state_dir: &Path) {
    if let Err(e) = connect.snapshot().write_to(state_dir) {
        warn!(error = %e, "cannot write status snapshot");
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
