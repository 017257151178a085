// ── Connect facade ──
//
// Wires supervisor, dispatcher, coordinator and forwarder together with
// the injected collaborators, and exposes the read side upward:
// connection status, remote access state, notification forwarding.

use std::sync::Arc;

use connect_api::{Notification, RelayConnector};
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::access::{CoordinatorTask, RemoteAccessCoordinator};
use crate::config::ConnectConfig;
use crate::dispatcher::RelayDispatcher;
use crate::error::CoreError;
use crate::model::{ConnectionStatus, RemoteAccessState, StatusSnapshot};
use crate::notify::NotificationForwarder;
use crate::ports::{ApiKeyProvider, GraphQlExecutor, PortForwarder};
use crate::supervisor::ReconnectSupervisor;

/// External collaborators, injected at construction.
pub struct Collaborators {
    pub connector: Arc<dyn RelayConnector>,
    pub executor: Arc<dyn GraphQlExecutor>,
    pub forwarder: Arc<dyn PortForwarder>,
    pub api_keys: Arc<dyn ApiKeyProvider>,
}

/// The relay as a whole.
///
/// Cheaply cloneable via `Arc<ConnectInner>`. Does nothing until
/// [`start()`](Self::start).
#[derive(Clone)]
pub struct Connect {
    inner: Arc<ConnectInner>,
}

struct ConnectInner {
    config: ConnectConfig,
    api_keys: Arc<dyn ApiKeyProvider>,
    supervisor: ReconnectSupervisor,
    dispatcher: RelayDispatcher,
    coordinator: RemoteAccessCoordinator,
    notifications: NotificationForwarder,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<serde_json::Value>>>,
    coordinator_task: Mutex<Option<CoordinatorTask>>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Connect {
    pub fn new(config: ConnectConfig, collaborators: Collaborators) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let supervisor =
            ReconnectSupervisor::new(config.relay.clone(), collaborators.connector, events_tx);
        let relay = supervisor.handle();

        let (coordinator, coordinator_task) = RemoteAccessCoordinator::new(
            config.remote_access.clone(),
            collaborators.forwarder,
            relay.clone(),
        );
        let dispatcher = RelayDispatcher::new(
            &config.relay,
            collaborators.executor,
            relay.clone(),
            coordinator.clone(),
        );
        let notifications = NotificationForwarder::new(relay);

        Self {
            inner: Arc::new(ConnectInner {
                config,
                api_keys: collaborators.api_keys,
                supervisor,
                dispatcher,
                coordinator,
                notifications,
                events_rx: Mutex::new(Some(events_rx)),
                coordinator_task: Mutex::new(Some(coordinator_task)),
                cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &ConnectConfig {
        &self.inner.config
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Spawn the background tasks and start connecting.
    ///
    /// Idempotent: later calls return `false` and change nothing.
    pub async fn start(&self) -> bool {
        let mut handles = self.inner.task_handles.lock().await;

        let Some(task) = self.inner.coordinator_task.lock().await.take() else {
            debug!("already started");
            return false;
        };
        handles.push(tokio::spawn(task.run(self.inner.cancel.child_token())));

        if let Some(events) = self.inner.events_rx.lock().await.take() {
            handles.push(
                self.inner
                    .dispatcher
                    .spawn(events, self.inner.supervisor.subscribe()),
            );
        }

        self.inner.supervisor.start(
            self.inner.config.relay.endpoint.clone(),
            Arc::clone(&self.inner.api_keys),
        );
        info!(endpoint = %self.inner.config.relay.endpoint, "relay started");
        true
    }

    /// Stop everything and wait for the background tasks.
    pub async fn stop(&self) {
        self.inner.supervisor.stop().await;
        self.inner.dispatcher.shutdown();
        self.inner.cancel.cancel();

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        info!("relay stopped");
    }

    // ── Read side ────────────────────────────────────────────────────

    pub fn connection_status(&self) -> ConnectionStatus {
        self.inner.supervisor.status()
    }

    pub fn remote_access_state(&self) -> RemoteAccessState {
        self.inner.coordinator.state()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot::new(self.connection_status(), self.remote_access_state())
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.supervisor.subscribe()
    }

    pub fn subscribe_remote_access(&self) -> watch::Receiver<RemoteAccessState> {
        self.inner.coordinator.subscribe()
    }

    pub fn on_status_change(&self, listener: impl Fn(&ConnectionStatus) + Send + Sync + 'static) {
        self.inner.supervisor.on_status_change(listener);
    }

    /// UPDATE_EVENT payloads relayed from mothership.
    pub fn updates(&self) -> broadcast::Receiver<Arc<serde_json::Value>> {
        self.inner.dispatcher.updates()
    }

    // ── Write side ───────────────────────────────────────────────────

    /// Push a notification to mothership. Fails fast when not CONNECTED.
    pub fn forward_notification(&self, notification: Notification) -> Result<(), CoreError> {
        self.inner.notifications.forward(notification)
    }

    pub fn supervisor(&self) -> &ReconnectSupervisor {
        &self.inner.supervisor
    }

    pub fn dispatcher(&self) -> &RelayDispatcher {
        &self.inner.dispatcher
    }

    pub fn coordinator(&self) -> &RemoteAccessCoordinator {
        &self.inner.coordinator
    }
}
