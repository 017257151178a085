// In-memory collaborators shared by the integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use connect_api::{
    AccessUrl, Error as ApiError, GraphQlRequest, GraphQlResponse, Inbound, Outbound,
    RelayConnector, RelayLink, RelayPeer, UrlType,
};
use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use secrecy::SecretString;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use url::Url;

use connect_core::{
    AccessType, AuthContext, BackoffConfig, Collaborators, Connect, ConnectConfig, CoreError,
    Forwarding, GraphQlExecutor, Lease, PortForwarder, RelayConfig, RemoteAccessConfig,
    ResponseStream, StaticApiKey,
};

// ── Config ──────────────────────────────────────────────────────────

pub fn relay_config() -> RelayConfig {
    RelayConfig {
        endpoint: Url::parse("wss://mothership.test/relay").unwrap(),
        backoff: BackoffConfig {
            base: Duration::from_millis(500),
            max: Duration::from_secs(30),
            factor: 2,
            jitter: 0.2,
            stability: Duration::from_secs(60),
        },
        ping_interval: Duration::from_secs(30),
        ping_timeout: Duration::from_secs(10),
        handshake_timeout: Duration::from_secs(15),
        workers: 4,
        backlog: 64,
        execute_timeout: Duration::from_secs(5),
        subscription_keepalive: Duration::from_secs(60),
    }
}

pub fn access_config(enabled_type: AccessType) -> RemoteAccessConfig {
    RemoteAccessConfig {
        enabled_type,
        wan_port: 8443,
        idle_grace: Duration::from_secs(60),
        client_timeout: Duration::from_secs(90),
        sweep_interval: Duration::from_secs(10),
        lease_renew_interval: Duration::from_secs(600),
        retry_attempts: 2,
        retry_base: Duration::from_millis(200),
        call_timeout: Duration::from_secs(5),
    }
}

pub fn api_key() -> SecretString {
    SecretString::from("device-key".to_string())
}

/// Let every runnable task settle. With paused time this also advances
/// the clock by a millisecond.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

// ── Connector ───────────────────────────────────────────────────────

pub enum Step {
    Accept,
    Fail(ApiError),
    Hang,
}

/// Hands out loopback links; the far ends arrive on `peers`.
pub struct ScriptedConnector {
    script: Mutex<VecDeque<Step>>,
    peers: mpsc::UnboundedSender<RelayPeer>,
    pub connects: AtomicUsize,
}

impl ScriptedConnector {
    pub fn new(script: Vec<Step>) -> (Arc<Self>, mpsc::UnboundedReceiver<RelayPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                script: Mutex::new(script.into()),
                peers,
                connects: AtomicUsize::new(0),
            }),
            rx,
        )
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl RelayConnector for ScriptedConnector {
    fn connect<'a>(
        &'a self,
        _endpoint: &'a Url,
        _api_key: &'a SecretString,
    ) -> BoxFuture<'a, Result<RelayLink, ApiError>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let step = self.script.lock().unwrap().pop_front().unwrap_or(Step::Accept);
        Box::pin(async move {
            match step {
                Step::Accept => {
                    let (link, peer) = RelayLink::loopback(32);
                    self.peers.send(peer).unwrap();
                    Ok(link)
                }
                Step::Fail(e) => Err(e),
                Step::Hang => std::future::pending().await,
            }
        })
    }
}

/// Answer the handshake ping of a freshly connected peer.
pub async fn complete_handshake(peer: &mut RelayPeer) {
    assert_eq!(peer.outbound.recv().await, Some(Outbound::Ping));
    peer.inbound.send(Ok(Inbound::Pong)).await.unwrap();
}

// ── Executor ────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeExecutor {
    pub executed: Mutex<Vec<GraphQlRequest>>,
    pub fail_with: Mutex<Option<String>>,
    pub delay: Mutex<Option<Duration>>,
    subscriptions: Mutex<Vec<mpsc::UnboundedSender<Result<GraphQlResponse, CoreError>>>>,
}

impl FakeExecutor {
    pub fn failing(message: &str) -> Self {
        let executor = Self::default();
        *executor.fail_with.lock().unwrap() = Some(message.into());
        executor
    }

    pub fn executed(&self) -> usize {
        self.executed.lock().unwrap().len()
    }

    /// Sender feeding the `n`th subscription opened so far.
    pub fn subscription(&self, n: usize) -> mpsc::UnboundedSender<Result<GraphQlResponse, CoreError>> {
        self.subscriptions.lock().unwrap()[n].clone()
    }

    pub fn subscriptions_opened(&self) -> usize {
        self.subscriptions.lock().unwrap().len()
    }
}

impl GraphQlExecutor for FakeExecutor {
    fn execute<'a>(
        &'a self,
        request: GraphQlRequest,
        _auth: &'a AuthContext,
    ) -> BoxFuture<'a, Result<GraphQlResponse, CoreError>> {
        Box::pin(async move {
            let delay = *self.delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.executed.lock().unwrap().push(request.clone());
            let failure = self.fail_with.lock().unwrap().clone();
            match failure {
                Some(message) => Err(CoreError::Execution { message }),
                None => Ok(GraphQlResponse {
                    data: Some(serde_json::json!({ "echo": request.query })),
                    errors: Vec::new(),
                }),
            }
        })
    }

    fn subscribe(&self, _request: GraphQlRequest, _auth: &AuthContext) -> ResponseStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscriptions.lock().unwrap().push(tx);
        UnboundedReceiverStream::new(rx).boxed()
    }
}

// ── Port forwarder ──────────────────────────────────────────────────

pub struct FakeForwarder {
    pub upnp: bool,
    pub open_calls: AtomicUsize,
    pub renew_calls: AtomicUsize,
    pub close_calls: AtomicUsize,
    /// Opens fail while this is non-zero (decremented per call).
    pub open_failures: AtomicU32,
    pub renew_fails: std::sync::atomic::AtomicBool,
    pub open_delay: Mutex<Option<Duration>>,
    pub closed: Mutex<Vec<Forwarding>>,
}

impl FakeForwarder {
    pub fn new(upnp: bool) -> Arc<Self> {
        Arc::new(Self {
            upnp,
            open_calls: AtomicUsize::new(0),
            renew_calls: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
            open_failures: AtomicU32::new(0),
            renew_fails: std::sync::atomic::AtomicBool::new(false),
            open_delay: Mutex::new(None),
            closed: Mutex::new(Vec::new()),
        })
    }

    pub fn failing_opens(upnp: bool, failures: u32) -> Arc<Self> {
        let forwarder = Self::new(upnp);
        forwarder.open_failures.store(failures, Ordering::SeqCst);
        forwarder
    }

    pub fn opens(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn renews(&self) -> usize {
        self.renew_calls.load(Ordering::SeqCst)
    }

    fn url(kind: UrlType, port: u16) -> AccessUrl {
        AccessUrl {
            kind,
            name: Some("WAN".into()),
            ipv4: Some(Url::parse(&format!("https://203.0.113.7:{port}")).unwrap()),
            ipv6: None,
        }
    }

    async fn open_gate(&self) -> Result<(), CoreError> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.open_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failing = self
            .open_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            Err(CoreError::PortForwarding {
                message: "mapping refused".into(),
            })
        } else {
            Ok(())
        }
    }
}

impl PortForwarder for FakeForwarder {
    fn supports_upnp(&self) -> bool {
        self.upnp
    }

    fn open_static(&self, port: u16) -> BoxFuture<'_, Result<AccessUrl, CoreError>> {
        Box::pin(async move {
            self.open_gate().await?;
            Ok(Self::url(UrlType::Wan, port))
        })
    }

    fn open_upnp(&self, desired_port: u16) -> BoxFuture<'_, Result<(AccessUrl, Lease), CoreError>> {
        Box::pin(async move {
            self.open_gate().await?;
            Ok((
                Self::url(UrlType::Wan, desired_port),
                Lease {
                    id: format!("lease-{desired_port}"),
                    external_port: desired_port,
                    ttl: Duration::from_secs(3600),
                },
            ))
        })
    }

    fn renew<'a>(&'a self, _lease: &'a Lease) -> BoxFuture<'a, Result<(), CoreError>> {
        Box::pin(async move {
            self.renew_calls.fetch_add(1, Ordering::SeqCst);
            if self.renew_fails.load(Ordering::SeqCst) {
                Err(CoreError::PortForwarding {
                    message: "lease expired".into(),
                })
            } else {
                Ok(())
            }
        })
    }

    fn close<'a>(&'a self, forwarding: &'a Forwarding) -> BoxFuture<'a, Result<(), CoreError>> {
        Box::pin(async move {
            self.close_calls.fetch_add(1, Ordering::SeqCst);
            self.closed.lock().unwrap().push(forwarding.clone());
            Ok(())
        })
    }
}

// ── Full stack ──────────────────────────────────────────────────────

pub struct Harness {
    pub connect: Connect,
    pub connector: Arc<ScriptedConnector>,
    pub peers: mpsc::UnboundedReceiver<RelayPeer>,
    pub executor: Arc<FakeExecutor>,
    pub forwarder: Arc<FakeForwarder>,
}

impl Harness {
    pub fn new(
        script: Vec<Step>,
        executor: FakeExecutor,
        forwarder: Arc<FakeForwarder>,
        enabled: AccessType,
    ) -> Self {
        let (connector, peers) = ScriptedConnector::new(script);
        let executor = Arc::new(executor);
        let connect = Connect::new(
            ConnectConfig {
                relay: relay_config(),
                remote_access: access_config(enabled),
            },
            Collaborators {
                connector: connector.clone(),
                executor: executor.clone(),
                forwarder: forwarder.clone(),
                api_keys: Arc::new(StaticApiKey(api_key())),
            },
        );
        Self {
            connect,
            connector,
            peers,
            executor,
            forwarder,
        }
    }

    /// Start and complete the first handshake.
    pub async fn connected(
        executor: FakeExecutor,
        forwarder: Arc<FakeForwarder>,
        enabled: AccessType,
    ) -> (Self, RelayPeer) {
        let mut harness = Self::new(Vec::new(), executor, forwarder, enabled);
        harness.connect.start().await;
        let mut peer = harness.peers.recv().await.unwrap();
        complete_handshake(&mut peer).await;
        harness
            .connect
            .subscribe_status()
            .wait_for(|s| s.is_connected())
            .await
            .unwrap();
        (harness, peer)
    }
}

/// Mothership side of a link with keepalives answered in the background.
pub struct Mothership {
    pub events: mpsc::Sender<Result<Inbound, ApiError>>,
    pub received: mpsc::UnboundedReceiver<Outbound>,
    pub cancel: CancellationToken,
}

impl Mothership {
    pub fn new(peer: RelayPeer) -> Self {
        let RelayPeer {
            mut outbound,
            inbound,
            cancel,
        } = peer;
        let (tx, received) = mpsc::unbounded_channel();
        let events = inbound.clone();
        tokio::spawn(async move {
            while let Some(message) = outbound.recv().await {
                match message {
                    Outbound::Ping => {
                        let _ = inbound.send(Ok(Inbound::Pong)).await;
                    }
                    other => {
                        let _ = tx.send(other);
                    }
                }
            }
        });
        Self {
            events,
            received,
            cancel,
        }
    }

    pub async fn event(&self, raw: serde_json::Value) {
        self.events.send(Ok(Inbound::Event(raw))).await.unwrap();
    }

    pub async fn next(&mut self) -> Outbound {
        self.received.recv().await.unwrap()
    }
}
