//! Mothership WebSocket transport.
//!
//! Opens a `graphql-transport-ws` session against the mothership endpoint,
//! authenticates with the device API key, subscribes to the relay event
//! stream, and hands the caller a [`RelayLink`]. A background pump task
//! owns the socket from then on: it serializes [`Outbound`] messages into
//! GraphQL mutations and unpacks `next` frames into [`Inbound::Event`]s.
//!
//! Reconnection is NOT handled here -- the supervisor in `connect-core`
//! owns retry and backoff and simply asks for a fresh link.
//!
//! # Example
//!
//! ```rust,ignore
//! use connect_api::websocket::{DeviceInfo, MothershipConnector};
//! use connect_api::relay::RelayConnector;
//!
//! let connector = MothershipConnector::new(DeviceInfo::default(), Duration::from_secs(15));
//! let mut link = connector.connect(&endpoint, &api_key).await?;
//! while let Some(frame) = link.inbound.recv().await {
//!     println!("{frame:?}");
//! }
//! ```

use std::ops::ControlFlow;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::{Sink, SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::envelope::{GraphQlRequest, GraphQlResponse};
use crate::error::Error;
use crate::protocol::{ClientMessage, SUBPROTOCOL, ServerMessage, close_code};
use crate::relay::{Inbound, Outbound, RelayConnector, RelayLink};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ── Channel capacity ─────────────────────────────────────────────────

const LINK_CHANNEL_CAPACITY: usize = 256;

// ── Operations ───────────────────────────────────────────────────────

/// Subscription id of the relay event stream on every session.
pub const EVENTS_SUBSCRIPTION_ID: &str = "events";

const EVENTS_SUBSCRIPTION: &str = "subscription events { events }";

const RESPONSE_MUTATION: &str = "mutation sendRemoteGraphQLResponse($input: RemoteGraphQLServerInput!) { remoteGraphQLResponse(input: $input) }";

const REMOTE_ACCESS_MUTATION: &str =
    "mutation remoteSession($remoteAccess: RemoteAccessInput!) { remoteSession(remoteAccess: $remoteAccess) }";

const NOTIFICATION_MUTATION: &str = "mutation sendNotification($notification: NotificationInput!) { sendNotification(notification: $notification) { title } }";

// ── DeviceInfo ───────────────────────────────────────────────────────

/// Device metadata sent with the `connection_init` payload.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub api_version: String,
    pub flash_guid: Option<String>,
    pub server_name: Option<String>,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            api_version: env!("CARGO_PKG_VERSION").into(),
            flash_guid: None,
            server_name: None,
        }
    }
}

// ── MothershipConnector ──────────────────────────────────────────────

/// [`RelayConnector`] backed by a real WebSocket.
#[derive(Debug, Clone)]
pub struct MothershipConnector {
    device: DeviceInfo,
    handshake_timeout: Duration,
}

impl MothershipConnector {
    pub fn new(device: DeviceInfo, handshake_timeout: Duration) -> Self {
        Self {
            device,
            handshake_timeout,
        }
    }

    fn init_payload(&self, api_key: &SecretString) -> serde_json::Value {
        let mut payload = json!({
            "x-api-key": api_key.expose_secret(),
            "x-unraid-api-version": self.device.api_version,
        });
        if let Some(ref guid) = self.device.flash_guid {
            payload["x-flash-guid"] = json!(guid);
        }
        if let Some(ref name) = self.device.server_name {
            payload["x-server-name"] = json!(name);
        }
        payload
    }

    async fn open(&self, endpoint: &Url, api_key: &SecretString) -> Result<RelayLink, Error> {
        info!(url = %endpoint, "connecting to mothership");

        let uri: tungstenite::http::Uri = endpoint
            .as_str()
            .parse()
            .map_err(|e: tungstenite::http::uri::InvalidUri| Error::WebSocketConnect(e.to_string()))?;

        let request = ClientRequestBuilder::new(uri)
            .with_sub_protocol(SUBPROTOCOL)
            .with_header("x-api-key", api_key.expose_secret())
            .with_header("x-unraid-api-version", self.device.api_version.clone());

        let timeout_ms = u64::try_from(self.handshake_timeout.as_millis()).unwrap_or(u64::MAX);

        let (mut ws, _response) =
            tokio::time::timeout(self.handshake_timeout, tokio_tungstenite::connect_async(request))
                .await
                .map_err(|_| Error::HandshakeTimeout { timeout_ms })?
                .map_err(map_connect_error)?;

        send_message(
            &mut ws,
            &ClientMessage::ConnectionInit {
                payload: Some(self.init_payload(api_key)),
            },
        )
        .await?;

        tokio::time::timeout(self.handshake_timeout, await_ack(&mut ws))
            .await
            .map_err(|_| Error::HandshakeTimeout { timeout_ms })??;

        send_message(
            &mut ws,
            &ClientMessage::Subscribe {
                id: EVENTS_SUBSCRIPTION_ID.into(),
                payload: GraphQlRequest {
                    query: EVENTS_SUBSCRIPTION.into(),
                    variables: None,
                    operation_name: Some("events".into()),
                },
            },
        )
        .await?;

        info!("mothership session established");

        let (out_tx, out_rx) = mpsc::channel(LINK_CHANNEL_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel(LINK_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        tokio::spawn(pump(ws, out_rx, in_tx, cancel.clone()));

        Ok(RelayLink::new(out_tx, in_rx, cancel))
    }
}

impl RelayConnector for MothershipConnector {
    fn connect<'a>(
        &'a self,
        endpoint: &'a Url,
        api_key: &'a SecretString,
    ) -> BoxFuture<'a, Result<RelayLink, Error>> {
        Box::pin(self.open(endpoint, api_key))
    }
}

// ── Handshake ────────────────────────────────────────────────────────

/// Read frames until `connection_ack`.
async fn await_ack(ws: &mut WsStream) -> Result<(), Error> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => match ServerMessage::decode(text.as_str())? {
                ServerMessage::ConnectionAck { .. } => return Ok(()),
                ServerMessage::Ping { .. } => {
                    send_message(ws, &ClientMessage::Pong { payload: None }).await?;
                }
                other => {
                    return Err(Error::Protocol(format!(
                        "expected connection_ack, got {other:?}"
                    )));
                }
            },
            Some(Ok(Message::Close(frame))) => return Err(close_error(frame.as_ref())),
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(Error::WebSocketConnect(e.to_string())),
            None => {
                return Err(Error::WebSocketClosed {
                    code: 1006,
                    reason: "stream ended during handshake".into(),
                });
            }
        }
    }
}

fn map_connect_error(err: tungstenite::Error) -> Error {
    match err {
        tungstenite::Error::Http(ref response)
            if matches!(response.status().as_u16(), 401 | 403) =>
        {
            Error::AuthRejected {
                reason: format!("HTTP {}", response.status()),
            }
        }
        other => Error::WebSocketConnect(other.to_string()),
    }
}

fn close_error(frame: Option<&CloseFrame>) -> Error {
    match frame {
        Some(cf) if close_code::is_auth(u16::from(cf.code)) => Error::AuthRejected {
            reason: cf.reason.to_string(),
        },
        Some(cf) => Error::WebSocketClosed {
            code: u16::from(cf.code),
            reason: cf.reason.to_string(),
        },
        None => Error::WebSocketClosed {
            code: 1005,
            reason: "no close frame payload".into(),
        },
    }
}

// ── Pump ─────────────────────────────────────────────────────────────

/// Own the socket: outbound channel → frames, frames → inbound channel.
async fn pump(
    ws: WsStream,
    mut out_rx: mpsc::Receiver<Outbound>,
    in_tx: mpsc::Sender<Result<Inbound, Error>>,
    cancel: CancellationToken,
) {
    let (mut write, mut read) = ws.split();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                break;
            }
            outbound = out_rx.recv() => {
                let Some(outbound) = outbound else { break };
                if let Err(e) = write_outbound(&mut write, outbound).await {
                    let _ = in_tx.send(Err(e)).await;
                    break;
                }
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if handle_text(text.as_str(), &in_tx, &mut write).await.is_break() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let err = close_error(frame.as_ref());
                        info!(error = %err, "mothership closed the session");
                        let _ = in_tx.send(Err(err)).await;
                        break;
                    }
                    Some(Ok(Message::Ping(_))) => {
                        // tungstenite answers transport-level pings itself
                        trace!("websocket ping");
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        let _ = in_tx.send(Err(Error::WebSocketConnect(e.to_string()))).await;
                        break;
                    }
                    None => {
                        let _ = in_tx
                            .send(Err(Error::WebSocketClosed {
                                code: 1006,
                                reason: "stream ended".into(),
                            }))
                            .await;
                        break;
                    }
                }
            }
        }
    }

    debug!("mothership pump exiting");
}

async fn handle_text<S>(
    text: &str,
    in_tx: &mpsc::Sender<Result<Inbound, Error>>,
    write: &mut S,
) -> ControlFlow<()>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let message = match ServerMessage::decode(text) {
        Ok(m) => m,
        Err(e) => {
            warn!(error = %e, "dropping undecodable frame");
            return ControlFlow::Continue(());
        }
    };

    match message {
        ServerMessage::Pong { .. } => forward(in_tx, Ok(Inbound::Pong)).await,
        ServerMessage::Ping { .. } => {
            let pong = ClientMessage::Pong { payload: None };
            match pong.encode() {
                Ok(text) => {
                    if write.send(Message::Text(text.into())).await.is_ok() {
                        ControlFlow::Continue(())
                    } else {
                        ControlFlow::Break(())
                    }
                }
                Err(e) => {
                    warn!(error = %e, "cannot encode pong");
                    ControlFlow::Break(())
                }
            }
        }
        ServerMessage::Next { id, payload } if id == EVENTS_SUBSCRIPTION_ID => {
            if payload.is_error() {
                warn!(errors = ?payload.errors, "event stream delivered errors");
            }
            for event in extract_events(&payload) {
                forward(in_tx, Ok(Inbound::Event(event))).await?;
            }
            ControlFlow::Continue(())
        }
        ServerMessage::Next { id, .. } => {
            trace!(%id, "mutation acknowledged");
            ControlFlow::Continue(())
        }
        ServerMessage::Error { id, payload } if id == EVENTS_SUBSCRIPTION_ID => {
            let messages: Vec<_> = payload.into_iter().map(|e| e.message).collect();
            let _ = in_tx
                .send(Err(Error::Protocol(format!(
                    "event subscription rejected: {}",
                    messages.join("; ")
                ))))
                .await;
            ControlFlow::Break(())
        }
        ServerMessage::Error { id, payload } => {
            warn!(%id, errors = ?payload, "mothership rejected an outbound message");
            ControlFlow::Continue(())
        }
        ServerMessage::Complete { id } if id == EVENTS_SUBSCRIPTION_ID => {
            let _ = in_tx
                .send(Err(Error::Protocol("event stream completed by server".into())))
                .await;
            ControlFlow::Break(())
        }
        ServerMessage::Complete { .. } | ServerMessage::ConnectionAck { .. } => {
            ControlFlow::Continue(())
        }
    }
}

async fn forward(
    in_tx: &mpsc::Sender<Result<Inbound, Error>>,
    item: Result<Inbound, Error>,
) -> ControlFlow<()> {
    if in_tx.send(item).await.is_err() {
        ControlFlow::Break(())
    } else {
        ControlFlow::Continue(())
    }
}

/// Pull individual events out of an `events` subscription payload.
///
/// Mothership batches: `data.events` is either one object or an array.
fn extract_events(payload: &GraphQlResponse) -> Vec<serde_json::Value> {
    match payload.data.as_ref().and_then(|d| d.get("events")) {
        Some(serde_json::Value::Array(events)) => events.clone(),
        Some(serde_json::Value::Null) | None => Vec::new(),
        Some(event) => vec![event.clone()],
    }
}

// ── Outbound encoding ────────────────────────────────────────────────

/// Wrap an [`Outbound`] in the frame mothership expects.
pub(crate) fn encode_outbound(outbound: Outbound) -> Result<ClientMessage, Error> {
    let (query, variables) = match outbound {
        Outbound::Ping => return Ok(ClientMessage::Ping { payload: None }),
        Outbound::Response(envelope) => (RESPONSE_MUTATION, json!({ "input": envelope })),
        Outbound::RemoteAccess(event) => (REMOTE_ACCESS_MUTATION, json!({ "remoteAccess": event })),
        Outbound::Notification(notification) => {
            (NOTIFICATION_MUTATION, json!({ "notification": notification }))
        }
    };

    Ok(ClientMessage::Subscribe {
        id: uuid::Uuid::new_v4().to_string(),
        payload: GraphQlRequest {
            query: query.into(),
            variables: Some(variables),
            operation_name: None,
        },
    })
}

async fn write_outbound<S>(write: &mut S, outbound: Outbound) -> Result<(), Error>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let text = encode_outbound(outbound)?.encode()?;
    write
        .send(Message::Text(text.into()))
        .await
        .map_err(|e| Error::WebSocketConnect(e.to_string()))
}

async fn send_message(ws: &mut WsStream, message: &ClientMessage) -> Result<(), Error> {
    let text = message.encode()?;
    ws.send(Message::Text(text.into()))
        .await
        .map_err(|e| Error::WebSocketConnect(e.to_string()))
}

// ── Tests ────────────────────────────────────────────────────────────
