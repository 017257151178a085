// ── Reconnect supervisor ──
//
// Owns at most one relay link at a time and drives the connection state
// machine:
//
//   PRE_INIT → CONNECTING → CONNECTED → ERROR_RETRYING | PING_FAILURE
//            ↑                                   │
//            └──────────── backoff ──────────────┘
//
// `stop()` moves any state to STOPPED. Inbound events go to the dispatcher
// over an unbounded queue, so they keep arrival order and are never dropped.
// The receive loop never waits on a consumer and the keepalive timer runs
// inside the same select. Load shedding happens in the dispatcher, which
// answers surplus requests instead of discarding them.

mod backoff;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use connect_api::{Inbound, Outbound, RelayConnector, RelayLink};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

pub use backoff::Backoff;

use crate::config::RelayConfig;
use crate::error::CoreError;
use crate::model::{ConnectionPhase, ConnectionStatus};
use crate::ports::ApiKeyProvider;
use crate::stream::StateStream;

type StatusListener = Box<dyn Fn(&ConnectionStatus) + Send + Sync>;

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ── ReconnectSupervisor ──────────────────────────────────────────────

/// Keeps the mothership connection alive.
///
/// Cheaply cloneable via `Arc<SupervisorInner>`.
#[derive(Clone)]
pub struct ReconnectSupervisor {
    inner: Arc<SupervisorInner>,
}

struct SupervisorInner {
    config: RelayConfig,
    connector: Arc<dyn RelayConnector>,
    status: watch::Sender<ConnectionStatus>,
    listeners: Mutex<Vec<StatusListener>>,
    outbound: Arc<ArcSwapOption<mpsc::Sender<Outbound>>>,
    events: mpsc::UnboundedSender<serde_json::Value>,
    started: AtomicBool,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Why a session ended.
enum SessionEnd {
    Failed(String),
    PingTimeout(String),
}

impl ReconnectSupervisor {
    /// Create a supervisor in PRE_INIT. Raw inbound events go to `events`.
    pub fn new(
        config: RelayConfig,
        connector: Arc<dyn RelayConnector>,
        events: mpsc::UnboundedSender<serde_json::Value>,
    ) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::pre_init());
        Self {
            inner: Arc::new(SupervisorInner {
                config,
                connector,
                status,
                listeners: Mutex::new(Vec::new()),
                outbound: Arc::new(ArcSwapOption::empty()),
                events,
                started: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                task: Mutex::new(None),
            }),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Start connecting. Returns `false` if already started or stopped.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, endpoint: Url, keys: Arc<dyn ApiKeyProvider>) -> bool {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            debug!("supervisor already started");
            return false;
        }

        self.inner.publish(ConnectionStatus::connecting(0));
        let handle = tokio::spawn(run(Arc::clone(&self.inner), endpoint, keys));
        *self
            .inner
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        true
    }

    /// Tear down the link, cancel timers and any in-flight handshake.
    ///
    /// Terminal: the supervisor cannot be restarted.
    pub async fn stop(&self) {
        self.inner.started.store(true, Ordering::SeqCst);
        self.inner.cancel.cancel();
        self.inner.outbound.store(None);
        self.inner.publish(ConnectionStatus::stopped());

        let handle = self
            .inner
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        info!("supervisor stopped");
    }

    // ── Observation ──────────────────────────────────────────────────

    /// Latest status snapshot. Never blocks.
    pub fn status(&self) -> ConnectionStatus {
        self.inner.status.borrow().clone()
    }

    /// Register a listener called synchronously on every transition.
    ///
    /// Listeners must not register further listeners.
    pub fn on_status_change(&self, listener: impl Fn(&ConnectionStatus) + Send + Sync + 'static) {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(listener));
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    pub fn status_stream(&self) -> StateStream<ConnectionStatus> {
        StateStream::new(self.inner.status.subscribe())
    }

    /// Sending side for components that talk to mothership.
    pub fn handle(&self) -> RelayHandle {
        RelayHandle {
            status: self.inner.status.subscribe(),
            outbound: Arc::clone(&self.inner.outbound),
        }
    }
}

impl SupervisorInner {
    /// Publish a transition. Nothing leaves STOPPED.
    fn publish(&self, next: ConnectionStatus) {
        // Held across the update so listeners see transitions in order.
        let listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);

        let changed = self.status.send_if_modified(|current| {
            if current.phase == ConnectionPhase::Stopped {
                return false;
            }
            *current = next.clone();
            true
        });

        if changed {
            info!(
                phase = %next.phase,
                error = next.error.as_deref().unwrap_or(""),
                timeout_ms = next.timeout_ms,
                "connection status changed"
            );
            for listener in listeners.iter() {
                listener(&next);
            }
        }
    }

    fn deliver(&self, event: serde_json::Value) {
        if self.events.send(event).is_err() {
            debug!("dispatcher gone, dropping relay event");
        }
    }

    // ── Session ──────────────────────────────────────────────────────

    /// One connection attempt, from handshake until the link dies.
    async fn session(
        &self,
        endpoint: &Url,
        keys: &dyn ApiKeyProvider,
        backoff: &mut Backoff,
    ) -> SessionEnd {
        let api_key = match keys.api_key() {
            Ok(key) => key,
            Err(e) => return SessionEnd::Failed(format!("API key unavailable: {e}")),
        };

        let handshake = self.connector.connect(endpoint, &api_key);
        let mut link = match tokio::time::timeout(self.config.handshake_timeout, handshake).await {
            Ok(Ok(link)) => link,
            Ok(Err(e)) => return SessionEnd::Failed(e.to_string()),
            Err(_) => {
                return SessionEnd::Failed(format!(
                    "handshake timed out after {}ms",
                    millis(self.config.handshake_timeout)
                ));
            }
        };

        let early = match self.first_keepalive(&mut link).await {
            Ok(early) => early,
            Err(e) => return SessionEnd::Failed(e),
        };

        self.outbound.store(Some(Arc::new(link.outbound.clone())));
        self.publish(ConnectionStatus::connected());
        let connected_at = Instant::now();

        for event in early {
            self.deliver(event);
        }

        let end = self.connected_loop(&mut link).await;

        self.outbound.store(None);
        link.close();

        if connected_at.elapsed() >= self.config.backoff.stability {
            debug!("connection was stable, resetting backoff");
            backoff.reset();
        }
        end
    }

    /// Ping and wait for the pong that completes the handshake.
    ///
    /// Events that arrive first are held back until CONNECTED.
    async fn first_keepalive(
        &self,
        link: &mut RelayLink,
    ) -> Result<Vec<serde_json::Value>, String> {
        link.outbound
            .send(Outbound::Ping)
            .await
            .map_err(|_| "link closed before keepalive".to_string())?;

        let mut early = Vec::new();
        let wait = async {
            loop {
                match link.inbound.recv().await {
                    Some(Ok(Inbound::Pong)) => return Ok(()),
                    Some(Ok(Inbound::Event(event))) => early.push(event),
                    Some(Err(e)) => return Err(e.to_string()),
                    None => return Err("connection closed before keepalive acknowledgement".into()),
                }
            }
        };

        let outcome = tokio::time::timeout(self.config.ping_timeout, wait).await;
        match outcome {
            Ok(Ok(())) => Ok(early),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(format!(
                "no keepalive acknowledgement within {}ms",
                millis(self.config.ping_timeout)
            )),
        }
    }

    /// Receive loop plus keepalive timer for a CONNECTED link.
    async fn connected_loop(&self, link: &mut RelayLink) -> SessionEnd {
        let interval = self.config.ping_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut pong_deadline: Option<Instant> = None;

        loop {
            let deadline = pong_deadline;
            tokio::select! {
                biased;
                () = sleep_until_opt(deadline) => {
                    return SessionEnd::PingTimeout(format!(
                        "no keepalive acknowledgement within {}ms",
                        millis(self.config.ping_timeout)
                    ));
                }
                frame = link.inbound.recv() => match frame {
                    Some(Ok(Inbound::Pong)) => pong_deadline = None,
                    Some(Ok(Inbound::Event(event))) => self.deliver(event),
                    Some(Err(e)) => return SessionEnd::Failed(e.to_string()),
                    None => return SessionEnd::Failed("connection closed unexpectedly".into()),
                },
                _ = ticker.tick() => {
                    if pong_deadline.is_some() {
                        continue;
                    }
                    match link.outbound.try_send(Outbound::Ping) {
                        Ok(()) | Err(TrySendError::Full(_)) => {
                            pong_deadline = Some(Instant::now() + self.config.ping_timeout);
                        }
                        Err(TrySendError::Closed(_)) => {
                            return SessionEnd::Failed("connection closed unexpectedly".into());
                        }
                    }
                }
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

// ── Supervisor task ──────────────────────────────────────────────────

async fn run(inner: Arc<SupervisorInner>, endpoint: Url, keys: Arc<dyn ApiKeyProvider>) {
    let mut backoff = Backoff::new(inner.config.backoff.clone());

    loop {
        let end = tokio::select! {
            biased;
            () = inner.cancel.cancelled() => break,
            end = inner.session(&endpoint, keys.as_ref(), &mut backoff) => end,
        };
        inner.outbound.store(None);

        let delay = backoff.next_delay();
        let attempt = backoff.attempt();
        let delay_ms = millis(delay);

        match end {
            SessionEnd::Failed(error) => {
                warn!(attempt, delay_ms, %error, "mothership connection failed");
                inner.publish(ConnectionStatus::error_retrying(error, delay_ms, attempt));
            }
            SessionEnd::PingTimeout(error) => {
                warn!(attempt, delay_ms, %error, "mothership keepalive failed");
                inner.publish(ConnectionStatus::ping_failure(error, attempt));
            }
        }

        tokio::select! {
            biased;
            () = inner.cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }

        inner.publish(ConnectionStatus::connecting(attempt));
    }

    debug!("supervisor task exiting");
}

// ── RelayHandle ──────────────────────────────────────────────────────

/// Sends messages over whatever link is live.
///
/// Every send checks the published phase first, so nothing is written to
/// a link that is not CONNECTED.
#[derive(Clone)]
pub struct RelayHandle {
    status: watch::Receiver<ConnectionStatus>,
    outbound: Arc<ArcSwapOption<mpsc::Sender<Outbound>>>,
}

impl RelayHandle {
    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.status.borrow().is_connected()
    }

    fn sender(&self) -> Result<Arc<mpsc::Sender<Outbound>>, CoreError> {
        let phase = self.status.borrow().phase;
        if phase != ConnectionPhase::Connected {
            return Err(CoreError::MothershipDown { phase });
        }
        self.outbound
            .load_full()
            .ok_or(CoreError::MothershipDown { phase })
    }

    /// Send without waiting. Fails fast when down or saturated.
    pub fn try_send(&self, message: Outbound) -> Result<(), CoreError> {
        self.sender()?.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => CoreError::RelayBackpressure,
            TrySendError::Closed(_) => CoreError::MothershipDown {
                phase: self.status.borrow().phase,
            },
        })
    }

    /// Send, waiting for queue space on the live link.
    pub async fn send(&self, message: Outbound) -> Result<(), CoreError> {
        let sender = self.sender()?;
        sender
            .send(message)
            .await
            .map_err(|_| CoreError::MothershipDown {
                phase: self.status.borrow().phase,
            })
    }
}

#[cfg(test)]
impl RelayHandle {
    /// A handle to a relay that never connects.
    pub(crate) fn detached() -> Self {
        let (_, status) = watch::channel(ConnectionStatus::pre_init());
        Self {
            status,
            outbound: Arc::new(ArcSwapOption::empty()),
        }
    }
}

impl std::fmt::Debug for RelayHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayHandle")
            .field("phase", &self.status.borrow().phase)
            .finish_non_exhaustive()
    }
}
