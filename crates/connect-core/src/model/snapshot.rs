// Persisted status snapshot read by `connect report`.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ConnectionStatus, RemoteAccessState};
use crate::error::CoreError;

/// File name of the snapshot inside the state directory.
pub const SNAPSHOT_FILE: &str = "status.json";

/// Connection and remote access state captured together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub connection: ConnectionStatus,
    pub remote_access: RemoteAccessState,
    pub updated_at: DateTime<Utc>,
}

impl StatusSnapshot {
    pub fn new(connection: ConnectionStatus, remote_access: RemoteAccessState) -> Self {
        Self {
            connection,
            remote_access,
            updated_at: Utc::now(),
        }
    }

    /// Write to `dir/status.json` via a temp file and rename.
    pub fn write_to(&self, dir: &Path) -> Result<(), CoreError> {
        std::fs::create_dir_all(dir).map_err(|e| CoreError::Config {
            message: format!("cannot create state dir {}: {e}", dir.display()),
        })?;

        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| CoreError::Internal(format!("snapshot serialization: {e}")))?;

        let tmp = dir.join(format!("{SNAPSHOT_FILE}.tmp"));
        let target = dir.join(SNAPSHOT_FILE);
        std::fs::write(&tmp, json)
            .and_then(|()| std::fs::rename(&tmp, &target))
            .map_err(|e| CoreError::Internal(format!("cannot write {}: {e}", target.display())))
    }

    /// Read `dir/status.json`. `Ok(None)` when the daemon never wrote one.
    pub fn read_from(dir: &Path) -> Result<Option<Self>, CoreError> {
        let path = dir.join(SNAPSHOT_FILE);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(CoreError::Internal(format!(
                    "cannot read {}: {e}",
                    path.display()
                )));
            }
        };
        serde_json::from_str(&text).map(Some).map_err(|e| CoreError::Protocol {
            message: format!("corrupt snapshot {}: {e}", path.display()),
        })
    }
}
