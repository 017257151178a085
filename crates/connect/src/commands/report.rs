//! `connect report`: render the snapshot a running relay last wrote.

use chrono::Utc;

use connect_core::{AccessType, ConnectionPhase, StatusSnapshot};

use crate::cli::{GlobalOpts, ReportArgs};
use crate::error::CliError;
use crate::output::{self, Field};

pub fn handle(args: &ReportArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let dir = match args.state_dir {
        Some(ref dir) => dir.clone(),
        None => super::load(global)?.0.state_dir(),
    };

    let snapshot = StatusSnapshot::read_from(&dir)?.ok_or_else(|| CliError::NoSnapshot {
        dir: dir.display().to_string(),
    })?;

    let color = output::should_color(&global.color);
    let rendered = output::render_single(&global.output, &snapshot, |s| detail(s, color))?;
    output::print_output(&rendered, global.quiet);
    Ok(())
}

fn detail(snapshot: &StatusSnapshot, color: bool) -> Vec<Field> {
    let conn = &snapshot.connection;
    let access = &snapshot.remote_access;

    let status = match conn.phase {
        ConnectionPhase::Connected => output::good(&conn.describe(), color),
        ConnectionPhase::ErrorRetrying | ConnectionPhase::PingFailure => {
            output::bad(&conn.describe(), color)
        }
        _ => conn.describe(),
    };

    let mut rows = vec![
        Field::new("Mothership", status),
        Field::new("Phase", conn.phase.to_string()),
    ];
    if let Some(ref error) = conn.error {
        rows.push(Field::new("Error", output::bad(error, color)));
    }
    if conn.attempt > 0 {
        rows.push(Field::new("Failed attempts", conn.attempt.to_string()));
    }
    rows.push(Field::new("Since", conn.since.to_rfc3339()));

    let running = if access.running_type == AccessType::Disabled {
        output::muted("DISABLED", color)
    } else {
        output::good(&access.running_type.to_string(), color)
    };
    rows.push(Field::new("Remote access", access.enabled_type.to_string()));
    rows.push(Field::new("Running", running));
    if let Some(ref url) = access.url {
        let addr = url
            .ipv4
            .as_ref()
            .or(url.ipv6.as_ref())
            .map_or_else(|| "-".to_owned(), ToString::to_string);
        rows.push(Field::new("URL", addr));
    }
    rows.push(Field::new("Clients", access.clients.to_string()));
    if let Some(ref error) = access.error {
        rows.push(Field::new("Access error", output::bad(error, color)));
    }

    let age = Utc::now()
        .signed_duration_since(snapshot.updated_at)
        .num_seconds()
        .max(0);
    rows.push(Field::new(
        "Updated",
        format!("{} ({age}s ago)", snapshot.updated_at.to_rfc3339()),
    ));
    rows
}
