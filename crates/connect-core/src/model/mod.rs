// ── Domain model ──
//
// Observable state of the relay: connection status, remote access state,
// live remote clients, and the persisted snapshot combining them.

pub mod access;
pub mod connection;
pub mod snapshot;

pub use access::{AccessType, ClientConnectionRecord, RemoteAccessState};
pub use connection::{ConnectionPhase, ConnectionStatus};
pub use snapshot::StatusSnapshot;
