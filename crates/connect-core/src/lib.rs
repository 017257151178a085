// connect-core: relay supervision, dispatch and remote access coordination.

pub mod access;
pub mod config;
pub mod connect;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod model;
pub mod notify;
pub mod ports;
pub mod stream;
pub mod supervisor;

// ── Primary re-exports ──────────────────────────────────────────────
pub use access::{
    AccessMethod, AccessTrigger, CoordinatorTask, RemoteAccessCoordinator, select_method,
};
pub use config::{BackoffConfig, ConnectConfig, RelayConfig, RemoteAccessConfig};
pub use connect::{Collaborators, Connect};
pub use dispatcher::RelayDispatcher;
pub use error::CoreError;
pub use executor::LocalExecutor;
pub use model::{
    AccessType, ClientConnectionRecord, ConnectionPhase, ConnectionStatus, RemoteAccessState,
    StatusSnapshot,
};
pub use notify::NotificationForwarder;
pub use ports::{
    ApiKeyProvider, AuthContext, Forwarding, GraphQlExecutor, Lease, PortForwarder, ResponseStream,
    StaticApiKey,
};
pub use stream::StateStream;
pub use supervisor::{Backoff, ReconnectSupervisor, RelayHandle};
