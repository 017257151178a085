use std::collections::HashMap;
use std::sync::Arc;

use connect_api::{
    AccessUrl, ClientInfo, ClientType, Outbound, RemoteAccessAction, RemoteAccessEvent,
};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::retry::with_retry;
use super::{AccessMethod, AccessTrigger, select_method};
use crate::config::RemoteAccessConfig;
use crate::error::CoreError;
use crate::model::{AccessType, ClientConnectionRecord, RemoteAccessState};
use crate::ports::{Forwarding, PortForwarder};
use crate::stream::StateStream;
use crate::supervisor::RelayHandle;

const TRIGGER_CHANNEL_SIZE: usize = 256;
const DONE_CHANNEL_SIZE: usize = 8;

// ── RemoteAccessCoordinator ──────────────────────────────────────────

/// Handle to the coordinator task.
///
/// Triggers are queued in arrival order; state is read from a `watch`
/// snapshot and never half-updated.
#[derive(Clone)]
pub struct RemoteAccessCoordinator {
    triggers: mpsc::Sender<AccessTrigger>,
    state: watch::Receiver<RemoteAccessState>,
}

impl RemoteAccessCoordinator {
    /// Build the handle and the task that owns the live-client set.
    ///
    /// Nothing runs until [`CoordinatorTask::run`] is spawned.
    pub fn new(
        config: RemoteAccessConfig,
        forwarder: Arc<dyn PortForwarder>,
        relay: RelayHandle,
    ) -> (Self, CoordinatorTask) {
        let (trigger_tx, trigger_rx) = mpsc::channel(TRIGGER_CHANNEL_SIZE);
        let (state_tx, state_rx) = watch::channel(RemoteAccessState::new(config.enabled_type));
        let (done_tx, done_rx) = mpsc::channel(DONE_CHANNEL_SIZE);

        let task = CoordinatorTask {
            config,
            forwarder,
            relay,
            triggers: trigger_rx,
            state: state_tx,
            clients: HashMap::new(),
            forwarding: None,
            idle_deadline: None,
            renew_deadline: None,
            pending: None,
            generation: 0,
            done_tx,
            done_rx,
        };

        (
            Self {
                triggers: trigger_tx,
                state: state_rx,
            },
            task,
        )
    }

    /// Queue a trigger, waiting for room so order is preserved.
    pub async fn notify(&self, trigger: AccessTrigger) -> Result<(), CoreError> {
        self.triggers
            .send(trigger)
            .await
            .map_err(|_| CoreError::Internal("remote access coordinator is not running".into()))
    }

    pub fn state(&self) -> RemoteAccessState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RemoteAccessState> {
        self.state.clone()
    }

    pub fn state_stream(&self) -> StateStream<RemoteAccessState> {
        StateStream::new(self.state.clone())
    }
}

// ── CoordinatorTask ──────────────────────────────────────────────────

struct LiveClient {
    record: ClientConnectionRecord,
    last_seen: Instant,
}

impl LiveClient {
    fn touch(&mut self) {
        self.record.touch();
        self.last_seen = Instant::now();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransitionKind {
    Enable,
    Disable,
    Renew,
}

struct Pending {
    kind: TransitionKind,
    generation: u64,
    cancel: CancellationToken,
    /// Session to acknowledge once an enable lands.
    ack_to: Option<String>,
}

struct TransitionDone {
    generation: u64,
    outcome: Outcome,
}

enum Outcome {
    Enabled {
        access_type: AccessType,
        url: AccessUrl,
        forwarding: Forwarding,
    },
    Disabled(Result<(), CoreError>),
    Renewed,
    Failed(CoreError),
}

/// The coordinator's own task. Sole owner of the live-client set.
pub struct CoordinatorTask {
    config: RemoteAccessConfig,
    forwarder: Arc<dyn PortForwarder>,
    relay: RelayHandle,
    triggers: mpsc::Receiver<AccessTrigger>,
    state: watch::Sender<RemoteAccessState>,
    clients: HashMap<String, LiveClient>,
    forwarding: Option<Forwarding>,
    idle_deadline: Option<Instant>,
    renew_deadline: Option<Instant>,
    pending: Option<Pending>,
    generation: u64,
    done_tx: mpsc::Sender<TransitionDone>,
    done_rx: mpsc::Receiver<TransitionDone>,
}

impl CoordinatorTask {
    /// Process triggers and timers until cancelled, then release any
    /// forwarding still held.
    pub async fn run(mut self, cancel: CancellationToken) {
        let sweep_every = self.config.sweep_interval;
        let mut sweep = tokio::time::interval_at(Instant::now() + sweep_every, sweep_every);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(enabled = %self.config.enabled_type, "remote access coordinator started");

        loop {
            let idle = self.idle_deadline;
            let renew = self.renew_deadline;

            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                Some(done) = self.done_rx.recv() => self.finish_transition(done),
                trigger = self.triggers.recv() => match trigger {
                    Some(trigger) => self.on_trigger(trigger),
                    None => break,
                },
                () = sleep_until_opt(idle) => self.on_idle_expired(),
                () = sleep_until_opt(renew) => self.on_renew_due(),
                _ = sweep.tick() => self.sweep_clients(),
            }
        }

        self.shutdown().await;
    }

    // ── Triggers ─────────────────────────────────────────────────────

    fn on_trigger(&mut self, trigger: AccessTrigger) {
        match trigger {
            AccessTrigger::ClientConnected(info) => {
                debug!(client = %info.api_key, kind = %info.client_type, "client connected");
                self.upsert_client(&info);
                self.client_arrived(None);
            }
            AccessTrigger::ClientPing(info) => match self.clients.get_mut(&info.api_key) {
                Some(client) => client.touch(),
                None => debug!(client = %info.api_key, "ping from unknown client ignored"),
            },
            AccessTrigger::ClientDisconnected(info) => {
                debug!(client = %info.api_key, "client disconnected");
                self.remove_client(&info.api_key);
            }
            AccessTrigger::RemoteAccess(event) => self.on_remote_access(event),
        }
        self.update(|_| {});
    }

    fn on_remote_access(&mut self, event: RemoteAccessEvent) {
        match event.action {
            RemoteAccessAction::Init => {
                info!(client = %event.api_key, "remote access session requested");
                self.upsert_client(&ClientInfo {
                    api_key: event.api_key.clone(),
                    client_type: ClientType::Dashboard,
                    version: None,
                });
                self.client_arrived(Some(event.api_key));
            }
            RemoteAccessAction::Ack | RemoteAccessAction::Ping => {
                if let Some(client) = self.clients.get_mut(&event.api_key) {
                    client.touch();
                }
                if self.idle_deadline.is_some() {
                    self.arm_idle();
                }
            }
            RemoteAccessAction::End => {
                info!(client = %event.api_key, "remote access session ended");
                self.clients.remove(&event.api_key);
                if self.clients.is_empty() {
                    self.idle_deadline = None;
                    self.begin_disable();
                }
            }
        }
    }

    fn upsert_client(&mut self, info: &ClientInfo) {
        self.clients
            .entry(info.api_key.clone())
            .and_modify(LiveClient::touch)
            .or_insert_with(|| LiveClient {
                record: ClientConnectionRecord::from_info(info),
                last_seen: Instant::now(),
            });
    }

    fn remove_client(&mut self, api_key: &str) {
        if self.clients.remove(api_key).is_none() {
            debug!(client = %api_key, "disconnect for unknown client ignored");
            return;
        }
        if self.clients.is_empty() {
            self.arm_idle();
        }
    }

    /// A client is live: keep or establish access.
    fn client_arrived(&mut self, ack_to: Option<String>) {
        self.idle_deadline = None;

        match self.pending.as_mut() {
            Some(pending) if pending.kind == TransitionKind::Disable => {
                info!("client returned, cancelling teardown");
                pending.cancel.cancel();
                self.pending = None;
            }
            Some(pending) if pending.kind == TransitionKind::Enable => {
                if ack_to.is_some() {
                    pending.ack_to = ack_to;
                }
                return;
            }
            _ => {}
        }

        if self.state.borrow().is_running() {
            if let Some(api_key) = ack_to {
                self.send_ack(api_key);
            }
            return;
        }

        self.begin_enable(ack_to);
    }

    // ── Timers ───────────────────────────────────────────────────────

    fn arm_idle(&mut self) {
        self.idle_deadline = Some(Instant::now() + self.config.idle_grace);
    }

    fn on_idle_expired(&mut self) {
        self.idle_deadline = None;
        if self.clients.is_empty() {
            info!("idle grace period elapsed with no clients");
            self.begin_disable();
            self.update(|_| {});
        }
    }

    fn on_renew_due(&mut self) {
        self.renew_deadline = None;

        let Some(Forwarding::Upnp(lease)) = self.forwarding.clone() else {
            return;
        };
        if self.pending.is_some() {
            // Busy; try again shortly.
            self.renew_deadline = Some(Instant::now() + self.config.retry_base);
            return;
        }

        debug!(lease = %lease.id, "renewing UPNP lease");
        let config = self.config.clone();
        self.spawn_transition(TransitionKind::Renew, None, move |forwarder| async move {
            match with_retry("renew", &config, || forwarder.renew(&lease)).await {
                Ok(()) => Outcome::Renewed,
                Err(e) => Outcome::Failed(e),
            }
        });
    }

    fn sweep_clients(&mut self) {
        let now = Instant::now();
        let timeout = self.config.client_timeout;
        let before = self.clients.len();

        self.clients.retain(|api_key, client| {
            let alive = now.duration_since(client.last_seen) < timeout;
            if !alive {
                info!(client = %api_key, "client ping timed out");
            }
            alive
        });

        if self.clients.len() != before {
            if self.clients.is_empty() {
                self.arm_idle();
            }
            self.update(|_| {});
        }
    }

    // ── Transitions ──────────────────────────────────────────────────

    fn begin_enable(&mut self, ack_to: Option<String>) {
        let method = match select_method(
            self.config.enabled_type,
            self.forwarder.supports_upnp(),
            self.config.wan_port,
        ) {
            Ok(Some(method)) => method,
            Ok(None) => {
                if let Some(api_key) = ack_to {
                    info!(client = %api_key, "remote access is disabled, refusing session");
                    self.send_end(api_key);
                }
                return;
            }
            Err(e) => {
                warn!(error = %e, "remote access cannot be enabled");
                let message = e.to_string();
                self.update(|s| s.error = Some(message));
                if let Some(api_key) = ack_to {
                    self.send_end(api_key);
                }
                return;
            }
        };

        info!(method = %method.access_type(), "enabling remote access");
        let config = self.config.clone();
        self.spawn_transition(TransitionKind::Enable, ack_to, move |forwarder| async move {
            enable(forwarder.as_ref(), method, &config).await
        });
    }

    fn begin_disable(&mut self) {
        match self.pending.as_ref().map(|p| p.kind) {
            Some(TransitionKind::Enable) => {
                info!("teardown requested while enabling, cancelling enable");
                if let Some(pending) = self.pending.take() {
                    pending.cancel.cancel();
                }
                return;
            }
            Some(TransitionKind::Disable) => return,
            Some(TransitionKind::Renew) | None => {}
        }

        let Some(forwarding) = self.forwarding.clone() else {
            return;
        };

        info!("disabling remote access");
        self.renew_deadline = None;
        let config = self.config.clone();
        self.spawn_transition(TransitionKind::Disable, None, move |forwarder| async move {
            let result = with_retry("close", &config, || forwarder.close(&forwarding)).await;
            Outcome::Disabled(result)
        });
    }

    /// Run `work` as the single in-flight transition, superseding any
    /// pending one.
    fn spawn_transition<F, Fut>(&mut self, kind: TransitionKind, ack_to: Option<String>, work: F)
    where
        F: FnOnce(Arc<dyn PortForwarder>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Outcome> + Send + 'static,
    {
        if let Some(previous) = self.pending.take() {
            debug!(previous = ?previous.kind, next = ?kind, "superseding pending transition");
            previous.cancel.cancel();
        }

        self.generation += 1;
        let generation = self.generation;
        let cancel = CancellationToken::new();
        self.pending = Some(Pending {
            kind,
            generation,
            cancel: cancel.clone(),
            ack_to,
        });

        let forwarder = Arc::clone(&self.forwarder);
        let done = self.done_tx.clone();
        tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                outcome = work(forwarder) => outcome,
            };
            let _ = done.send(TransitionDone { generation, outcome }).await;
        });
    }

    fn finish_transition(&mut self, done: TransitionDone) {
        let Some(pending) = self.pending.take_if(|p| p.generation == done.generation) else {
            self.finish_stale(done);
            return;
        };

        match done.outcome {
            Outcome::Enabled {
                access_type,
                url,
                forwarding,
            } => {
                info!(running = %access_type, "remote access enabled");
                self.renew_deadline = matches!(forwarding, Forwarding::Upnp(_))
                    .then(|| Instant::now() + self.config.lease_renew_interval);
                self.forwarding = Some(forwarding);
                self.update(|s| {
                    s.running_type = access_type;
                    s.url = Some(url);
                    s.error = None;
                });
                if let Some(api_key) = pending.ack_to {
                    self.send_ack(api_key);
                }
                if self.clients.is_empty() && self.idle_deadline.is_none() {
                    self.arm_idle();
                }
            }
            Outcome::Disabled(result) => {
                self.forwarding = None;
                self.renew_deadline = None;
                let error = result.err().map(|e| format!("teardown failed: {e}"));
                if let Some(ref e) = error {
                    warn!(error = %e, "remote access teardown failed");
                }
                info!("remote access disabled");
                self.update(|s| {
                    s.running_type = AccessType::Disabled;
                    s.url = None;
                    if error.is_some() {
                        s.error = error;
                    }
                });
            }
            Outcome::Renewed => {
                debug!("UPNP lease renewed");
                self.renew_deadline = Some(Instant::now() + self.config.lease_renew_interval);
            }
            Outcome::Failed(e) if pending.kind == TransitionKind::Renew => {
                warn!(error = %e, "UPNP lease renewal failed, tearing down");
                let message = format!("lease renewal failed: {e}");
                self.update(|s| s.error = Some(message));
                self.begin_disable();
            }
            Outcome::Failed(e) => {
                warn!(error = %e, "enabling remote access failed");
                let message = e.to_string();
                self.update(|s| s.error = Some(message));
            }
        }
    }

    /// A superseded transition finished anyway. Its forwarding is either
    /// taken over by a newer enable still in flight or released.
    fn finish_stale(&mut self, done: TransitionDone) {
        let Outcome::Enabled {
            access_type,
            url,
            forwarding,
        } = done.outcome
        else {
            debug!(generation = done.generation, "stale transition result ignored");
            return;
        };

        let newer_enable = self
            .pending
            .as_ref()
            .filter(|p| p.kind == TransitionKind::Enable);
        if let Some(pending) = newer_enable {
            debug!(generation = done.generation, "adopting forwarding from superseded enable");
            pending.cancel.cancel();
            let generation = pending.generation;
            self.finish_transition(TransitionDone {
                generation,
                outcome: Outcome::Enabled {
                    access_type,
                    url,
                    forwarding,
                },
            });
            return;
        }

        // The router holds one mapping per port.
        if self
            .forwarding
            .as_ref()
            .is_some_and(|current| current.port() == forwarding.port())
        {
            debug!(port = forwarding.port(), "superseded forwarding already in use");
            return;
        }

        info!(port = forwarding.port(), "releasing forwarding from superseded enable");
        let forwarder = Arc::clone(&self.forwarder);
        let config = self.config.clone();
        tokio::spawn(async move {
            if let Err(e) = with_retry("close", &config, || forwarder.close(&forwarding)).await {
                warn!(error = %e, "releasing superseded forwarding failed");
            }
        });
    }

    // ── Outputs ──────────────────────────────────────────────────────

    /// Apply `f` and republish with the current client count.
    fn update(&self, f: impl FnOnce(&mut RemoteAccessState)) {
        let clients = self.clients.len();
        self.state.send_if_modified(|state| {
            let before = state.clone();
            f(state);
            state.clients = clients;
            *state != before
        });
    }

    /// Best-effort acknowledgement of an INIT.
    fn send_ack(&self, api_key: String) {
        let url = self.state.borrow().url.clone();
        let event = RemoteAccessEvent {
            action: RemoteAccessAction::Ack,
            api_key,
            url,
        };
        if let Err(e) = self.relay.try_send(Outbound::RemoteAccess(event)) {
            warn!(error = %e, "remote access acknowledgement not sent");
        }
    }

    /// Best-effort refusal of an INIT that cannot be served.
    fn send_end(&self, api_key: String) {
        let event = RemoteAccessEvent {
            action: RemoteAccessAction::End,
            api_key,
            url: None,
        };
        if let Err(e) = self.relay.try_send(Outbound::RemoteAccess(event)) {
            debug!(error = %e, "remote access refusal not sent");
        }
    }

    async fn shutdown(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.cancel.cancel();
        }

        if let Some(forwarding) = self.forwarding.take() {
            let close = self.forwarder.close(&forwarding);
            match tokio::time::timeout(self.config.call_timeout, close).await {
                Ok(Ok(())) => debug!("forwarding released on shutdown"),
                Ok(Err(e)) => warn!(error = %e, "releasing forwarding on shutdown failed"),
                Err(_) => warn!("releasing forwarding on shutdown timed out"),
            }
        }

        self.clients.clear();
        self.update(|s| {
            s.running_type = AccessType::Disabled;
            s.url = None;
        });
        info!("remote access coordinator stopped");
    }
}

async fn enable(
    forwarder: &dyn PortForwarder,
    method: AccessMethod,
    config: &RemoteAccessConfig,
) -> Outcome {
    match method {
        AccessMethod::Static { port } => {
            match with_retry("openStatic", config, || forwarder.open_static(port)).await {
                Ok(url) => Outcome::Enabled {
                    access_type: AccessType::Static,
                    url,
                    forwarding: Forwarding::Static { port },
                },
                Err(e) => Outcome::Failed(e),
            }
        }
        AccessMethod::Upnp { desired_port } => {
            match with_retry("openUpnp", config, || forwarder.open_upnp(desired_port)).await {
                Ok((url, lease)) => Outcome::Enabled {
                    access_type: AccessType::Upnp,
                    url,
                    forwarding: Forwarding::Upnp(lease),
                },
                Err(e) => Outcome::Failed(e),
            }
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use connect_api::UrlType;
    use futures_util::future::BoxFuture;

    use super::*;
    use crate::ports::Lease;

    #[derive(Default)]
    struct RecordingForwarder {
        closed: Mutex<Vec<Forwarding>>,
    }

    impl PortForwarder for RecordingForwarder {
        fn supports_upnp(&self) -> bool {
            true
        }

        fn open_static(&self, _port: u16) -> BoxFuture<'_, Result<AccessUrl, CoreError>> {
            Box::pin(async { Ok(wan_url()) })
        }

        fn open_upnp(&self, port: u16) -> BoxFuture<'_, Result<(AccessUrl, Lease), CoreError>> {
            Box::pin(async move { Ok((wan_url(), lease(port))) })
        }

        fn renew<'a>(&'a self, _lease: &'a Lease) -> BoxFuture<'a, Result<(), CoreError>> {
            Box::pin(async { Ok(()) })
        }

        fn close<'a>(&'a self, forwarding: &'a Forwarding) -> BoxFuture<'a, Result<(), CoreError>> {
            Box::pin(async move {
                self.closed.lock().unwrap().push(forwarding.clone());
                Ok(())
            })
        }
    }

    fn wan_url() -> AccessUrl {
        AccessUrl {
            kind: UrlType::Wan,
            name: None,
            ipv4: Some("https://203.0.113.7:8443".parse().unwrap()),
            ipv6: None,
        }
    }

    fn lease(port: u16) -> Lease {
        Lease {
            id: format!("lease-{port}"),
            external_port: port,
            ttl: Duration::from_secs(3600),
        }
    }

    fn coordinator(forwarder: Arc<RecordingForwarder>) -> (RemoteAccessCoordinator, CoordinatorTask) {
        let config = RemoteAccessConfig {
            enabled_type: AccessType::Upnp,
            ..RemoteAccessConfig::default()
        };
        RemoteAccessCoordinator::new(config, forwarder, RelayHandle::detached())
    }

    fn pending(task: &mut CoordinatorTask, kind: TransitionKind, generation: u64) -> CancellationToken {
        let cancel = CancellationToken::new();
        task.generation = generation;
        task.pending = Some(Pending {
            kind,
            generation,
            cancel: cancel.clone(),
            ack_to: None,
        });
        cancel
    }

    fn enabled(generation: u64, port: u16) -> TransitionDone {
        TransitionDone {
            generation,
            outcome: Outcome::Enabled {
                access_type: AccessType::Upnp,
                url: wan_url(),
                forwarding: Forwarding::Upnp(lease(port)),
            },
        }
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_enable_releases_its_mapping() {
        let forwarder = Arc::new(RecordingForwarder::default());
        let (handle, mut task) = coordinator(Arc::clone(&forwarder));
        pending(&mut task, TransitionKind::Disable, 2);

        task.finish_transition(enabled(1, 8443));
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(
            *forwarder.closed.lock().unwrap(),
            vec![Forwarding::Upnp(lease(8443))]
        );
        assert_eq!(task.forwarding, None);
        assert_eq!(handle.state().running_type, AccessType::Disabled);
        assert!(task.pending.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn newer_enable_adopts_superseded_mapping() {
        let forwarder = Arc::new(RecordingForwarder::default());
        let (handle, mut task) = coordinator(Arc::clone(&forwarder));
        let cancel = pending(&mut task, TransitionKind::Enable, 2);

        task.finish_transition(enabled(1, 8443));
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert!(cancel.is_cancelled());
        assert!(task.pending.is_none());
        assert_eq!(task.forwarding, Some(Forwarding::Upnp(lease(8443))));
        assert_eq!(handle.state().running_type, AccessType::Upnp);
        assert!(forwarder.closed.lock().unwrap().is_empty());

        // The cancelled enable landed too; same port, nothing to release.
        task.finish_transition(enabled(2, 8443));
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(forwarder.closed.lock().unwrap().is_empty());
    }
}
