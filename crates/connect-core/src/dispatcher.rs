// ── Relay dispatcher ──
//
// Consumes raw events from the supervisor in arrival order. GraphQL work
// runs on a bounded worker pool and answers through the relay handle.
// Requests beyond the pool plus its backlog are answered "relay busy" at
// once, so the loop never waits on a worker and client or remote-access
// events reach the coordinator in order behind any flood. Update payloads
// are broadcast. Digest failures are dropped with a warning and never reach
// the executor.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use connect_api::{
    GraphQlResponse, Outbound, RelayEnvelope, RelayEvent, RelayedRequest, RemoteGraphQlEventType,
};
use dashmap::DashMap;
use futures_util::StreamExt;
use tokio::sync::{Semaphore, TryAcquireError, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::access::{AccessTrigger, RemoteAccessCoordinator};
use crate::config::RelayConfig;
use crate::model::ConnectionStatus;
use crate::ports::{AuthContext, GraphQlExecutor};
use crate::supervisor::RelayHandle;

const UPDATE_CHANNEL_SIZE: usize = 64;

const BUSY: &str = "relay busy";

struct Subscription {
    generation: u64,
    keepalive: watch::Sender<Instant>,
    cancel: CancellationToken,
}

/// Routes inbound relay events. Cheaply cloneable.
#[derive(Clone)]
pub struct RelayDispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    executor: Arc<dyn GraphQlExecutor>,
    auth: AuthContext,
    relay: RelayHandle,
    coordinator: RemoteAccessCoordinator,
    updates: broadcast::Sender<Arc<serde_json::Value>>,
    workers: Arc<Semaphore>,
    /// Admission: running plus waiting requests.
    admitted: Arc<Semaphore>,
    execute_timeout: Duration,
    subscription_keepalive: Duration,
    subscriptions: DashMap<String, Subscription>,
    next_generation: AtomicU64,
    cancel: CancellationToken,
}

impl RelayDispatcher {
    pub fn new(
        config: &RelayConfig,
        executor: Arc<dyn GraphQlExecutor>,
        relay: RelayHandle,
        coordinator: RemoteAccessCoordinator,
    ) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_SIZE);
        let workers = config.workers.max(1);
        Self {
            inner: Arc::new(DispatcherInner {
                executor,
                auth: AuthContext::service(),
                relay,
                coordinator,
                updates,
                workers: Arc::new(Semaphore::new(workers)),
                admitted: Arc::new(Semaphore::new(workers.saturating_add(config.backlog))),
                execute_timeout: config.execute_timeout,
                subscription_keepalive: config.subscription_keepalive,
                subscriptions: DashMap::new(),
                next_generation: AtomicU64::new(0),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// UPDATE_EVENT payloads as they arrive.
    pub fn updates(&self) -> broadcast::Receiver<Arc<serde_json::Value>> {
        self.inner.updates.subscribe()
    }

    /// Number of relayed subscriptions currently open.
    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.len()
    }

    // ── Event loop ───────────────────────────────────────────────────

    /// Spawn the dispatch loop.
    ///
    /// Subscriptions are reaped whenever `status` leaves CONNECTED.
    pub fn spawn(
        &self,
        mut events: mpsc::UnboundedReceiver<serde_json::Value>,
        mut status: watch::Receiver<ConnectionStatus>,
    ) -> JoinHandle<()> {
        let dispatcher = self.clone();
        let cancel = self.inner.cancel.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    changed = status.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let connected = status.borrow_and_update().is_connected();
                        if !connected {
                            dispatcher.reap_subscriptions();
                        }
                    }
                    event = events.recv() => match event {
                        Some(raw) => dispatcher.dispatch_raw(&raw).await,
                        None => break,
                    },
                }
            }
            dispatcher.reap_subscriptions();
            debug!("dispatcher loop exiting");
        })
    }

    /// Stop the loop and every relayed subscription.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.reap_subscriptions();
    }

    /// Decode one raw event and route it. Undecodable events are dropped.
    pub async fn dispatch_raw(&self, raw: &serde_json::Value) {
        match RelayEvent::decode(raw) {
            Ok(event) => self.dispatch(event).await,
            Err(e) => warn!(error = %e, "dropping undecodable relay event"),
        }
    }

    pub async fn dispatch(&self, event: RelayEvent) {
        trace!(kind = event.type_name(), "relay event");

        let trigger = match event {
            RelayEvent::RemoteGraphQl(envelope) => {
                self.handle(envelope);
                return;
            }
            RelayEvent::Update(payload) => {
                // No receivers is fine.
                let _ = self.inner.updates.send(Arc::new(payload));
                return;
            }
            RelayEvent::ClientConnected(info) => AccessTrigger::ClientConnected(info),
            RelayEvent::ClientDisconnected(info) => AccessTrigger::ClientDisconnected(info),
            RelayEvent::ClientPing(info) => AccessTrigger::ClientPing(info),
            RelayEvent::RemoteAccess(event) => AccessTrigger::RemoteAccess(event),
        };

        if let Err(e) = self.inner.coordinator.notify(trigger).await {
            warn!(error = %e, "remote access trigger dropped");
        }
    }

    // ── GraphQL envelopes ────────────────────────────────────────────

    /// Verify and classify one envelope.
    ///
    /// Never waits: queries and mutations are admitted to the worker pool
    /// or answered busy.
    pub fn handle(&self, envelope: RelayEnvelope) {
        if let Err(e) = envelope.verify() {
            warn!(kind = %envelope.kind, error = %e, "dropping relay envelope with bad digest");
            return;
        }

        let request = match envelope.request() {
            Ok(request) => request,
            Err(e) => {
                warn!(kind = %envelope.kind, error = %e, "dropping malformed relay envelope");
                return;
            }
        };
        let id = request.correlation_id(&envelope);

        match envelope.kind {
            RemoteGraphQlEventType::RemoteQueryEvent
            | RemoteGraphQlEventType::RemoteMutationEvent => {
                self.spawn_execute(envelope.kind, id, request);
            }
            RemoteGraphQlEventType::RemoteSubscriptionEvent if request.stop => {
                self.unsubscribe(&id);
            }
            RemoteGraphQlEventType::RemoteSubscriptionEvent => self.subscribe(id, request),
            RemoteGraphQlEventType::RemoteSubscriptionEventPing => self.keepalive(&id),
        }
    }

    fn spawn_execute(&self, kind: RemoteGraphQlEventType, id: String, request: RelayedRequest) {
        let admitted = match Arc::clone(&self.inner.admitted).try_acquire_owned() {
            Ok(admitted) => admitted,
            Err(TryAcquireError::NoPermits) => {
                warn!(%kind, %id, "worker pool saturated, answering busy");
                let inner = Arc::clone(&self.inner);
                tokio::spawn(async move {
                    inner.respond(kind, &id, GraphQlResponse::error(BUSY)).await;
                });
                return;
            }
            Err(TryAcquireError::Closed) => return,
        };

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let _admitted = admitted;
            let Ok(_permit) = Arc::clone(&inner.workers).acquire_owned().await else {
                return;
            };
            debug!(%kind, %id, "executing relayed request");

            let execution = inner.executor.execute(request.into_graphql(), &inner.auth);
            let response = match tokio::time::timeout(inner.execute_timeout, execution).await {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => GraphQlResponse::error(e.to_string()),
                Err(_) => GraphQlResponse::error(format!(
                    "local execution timed out after {}ms",
                    inner.execute_timeout.as_millis()
                )),
            };

            inner.respond(kind, &id, response).await;
        });
    }

    // ── Subscriptions ────────────────────────────────────────────────

    fn subscribe(&self, id: String, request: RelayedRequest) {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancel = self.inner.cancel.child_token();
        let (keepalive, keepalive_rx) = watch::channel(Instant::now());

        let previous = self.inner.subscriptions.insert(
            id.clone(),
            Subscription {
                generation,
                keepalive,
                cancel: cancel.clone(),
            },
        );
        if let Some(previous) = previous {
            debug!(%id, "replacing existing relayed subscription");
            previous.cancel.cancel();
        }

        info!(%id, "relayed subscription opened");
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner
                .run_subscription(&id, request, keepalive_rx, cancel)
                .await;
            inner
                .subscriptions
                .remove_if(&id, |_, sub| sub.generation == generation);
            info!(%id, "relayed subscription closed");
        });
    }

    fn unsubscribe(&self, id: &str) {
        match self.inner.subscriptions.remove(id) {
            Some((_, sub)) => sub.cancel.cancel(),
            None => debug!(%id, "unsubscribe for unknown subscription"),
        }
    }

    fn keepalive(&self, id: &str) {
        match self.inner.subscriptions.get(id) {
            Some(sub) => {
                sub.keepalive.send_replace(Instant::now());
            }
            None => debug!(%id, "keepalive for unknown subscription"),
        }
    }

    fn reap_subscriptions(&self) {
        let count = self.inner.subscriptions.len();
        if count == 0 {
            return;
        }
        self.inner.subscriptions.retain(|_, sub| {
            sub.cancel.cancel();
            false
        });
        info!(count, "relayed subscriptions reaped");
    }
}

impl DispatcherInner {
    async fn respond(&self, kind: RemoteGraphQlEventType, id: &str, response: GraphQlResponse) {
        let envelope = match RelayEnvelope::response(kind, id, response) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(%id, error = %e, "cannot encode relay response");
                return;
            }
        };
        if let Err(e) = self.relay.send(Outbound::Response(envelope)).await {
            warn!(%id, error = %e, "relay response dropped");
        }
    }

    /// Forward results in order until the stream ends, the keepalive
    /// lapses, or the subscription is cancelled.
    async fn run_subscription(
        &self,
        id: &str,
        request: RelayedRequest,
        keepalive: watch::Receiver<Instant>,
        cancel: CancellationToken,
    ) {
        let kind = RemoteGraphQlEventType::RemoteSubscriptionEvent;
        let mut results = self.executor.subscribe(request.into_graphql(), &self.auth);

        loop {
            let deadline = *keepalive.borrow() + self.subscription_keepalive;
            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                () = tokio::time::sleep_until(deadline) => {
                    if *keepalive.borrow() + self.subscription_keepalive <= Instant::now() {
                        info!(%id, "relayed subscription keepalive lapsed");
                        return;
                    }
                }
                item = results.next() => match item {
                    Some(Ok(response)) => self.respond(kind, id, response).await,
                    Some(Err(e)) => {
                        self.respond(kind, id, GraphQlResponse::error(e.to_string())).await;
                        return;
                    }
                    None => return,
                },
            }
        }
    }
}
