// Client for the device's own GraphQL engine.
//
// Queries and mutations go over HTTP POST. Subscriptions open a dedicated
// graphql-transport-ws socket per operation so one relayed subscription
// can be torn down without touching the others.

use std::time::Duration;

use futures_util::stream::BoxStream;
use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tokio_tungstenite::tungstenite::{ClientRequestBuilder, Message};
use tracing::debug;
use url::Url;

use crate::envelope::{GraphQlRequest, GraphQlResponse};
use crate::error::Error;
use crate::protocol::{ClientMessage, SUBPROTOCOL, ServerMessage};
use crate::transport::TransportConfig;

const SUBSCRIPTION_ID: &str = "1";

/// HTTP + WebSocket client for the local GraphQL endpoint.
#[derive(Clone)]
pub struct LocalGraphQlClient {
    http: reqwest::Client,
    endpoint: Url,
    ws_endpoint: Url,
    api_key: SecretString,
    timeout: Duration,
}

impl std::fmt::Debug for LocalGraphQlClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalGraphQlClient")
            .field("endpoint", &self.endpoint.as_str())
            .field("ws_endpoint", &self.ws_endpoint.as_str())
            .finish_non_exhaustive()
    }
}

impl LocalGraphQlClient {
    /// Build a client for `endpoint` (e.g. `http://127.0.0.1/graphql`).
    pub fn new(
        endpoint: Url,
        api_key: SecretString,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_client(&api_key)?;
        let ws_endpoint = websocket_url(&endpoint)?;
        Ok(Self {
            http,
            endpoint,
            ws_endpoint,
            api_key,
            timeout: transport.timeout,
        })
    }

    /// Wrap an existing `reqwest::Client`. The caller owns header setup.
    pub fn from_reqwest(
        endpoint: &str,
        api_key: SecretString,
        http: reqwest::Client,
    ) -> Result<Self, Error> {
        let endpoint = Url::parse(endpoint)?;
        let ws_endpoint = websocket_url(&endpoint)?;
        Ok(Self {
            http,
            endpoint,
            ws_endpoint,
            api_key,
            timeout: TransportConfig::default().timeout,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    // ── Queries and mutations ────────────────────────────────────────

    /// Run a query or mutation and return the GraphQL response.
    ///
    /// GraphQL-level errors come back inside the response; only transport
    /// and HTTP failures are `Err`.
    pub async fn execute(&self, request: &GraphQlRequest) -> Result<GraphQlResponse, Error> {
        debug!(operation = ?request.operation_name, "POST {}", self.endpoint);

        let resp = self
            .http
            .post(self.endpoint.clone())
            .json(request)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| self.map_transport(e))?;

        if !status.is_success() {
            // Some engines return a valid GraphQL error document with 4xx.
            if let Ok(parsed) = serde_json::from_str::<GraphQlResponse>(&body) {
                if parsed.is_error() {
                    return Ok(parsed);
                }
            }
            return Err(Error::GraphQl {
                status: status.as_u16(),
                message: truncate(&body, 200),
            });
        }

        serde_json::from_str(&body).map_err(|e| Error::deserialization(&e, &body))
    }

    fn map_transport(&self, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::Timeout {
                timeout_secs: self.timeout.as_secs(),
            }
        } else {
            Error::Transport(err)
        }
    }

    // ── Subscriptions ────────────────────────────────────────────────

    /// Start a subscription and stream its payloads.
    ///
    /// The stream ends when the server completes the operation. Dropping
    /// it closes the socket.
    pub fn subscribe(
        &self,
        request: GraphQlRequest,
    ) -> BoxStream<'static, Result<GraphQlResponse, Error>> {
        let endpoint = self.ws_endpoint.clone();
        let api_key = self.api_key.clone();

        let stream = async_stream::try_stream! {
            let uri: tokio_tungstenite::tungstenite::http::Uri = endpoint
                .as_str()
                .parse()
                .map_err(|e: tokio_tungstenite::tungstenite::http::uri::InvalidUri| {
                    Error::WebSocketConnect(e.to_string())
                })?;
            let ws_request = ClientRequestBuilder::new(uri)
                .with_sub_protocol(SUBPROTOCOL)
                .with_header("x-api-key", api_key.expose_secret());

            let (mut ws, _) = tokio_tungstenite::connect_async(ws_request)
                .await
                .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

            let init = ClientMessage::ConnectionInit {
                payload: Some(json!({ "x-api-key": api_key.expose_secret() })),
            };
            ws.send(Message::Text(init.encode()?.into()))
                .await
                .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

            let subscribe = ClientMessage::Subscribe {
                id: SUBSCRIPTION_ID.into(),
                payload: request,
            };
            let mut subscribed = false;

            while let Some(frame) = ws.next().await {
                let frame = frame.map_err(|e| Error::WebSocketConnect(e.to_string()))?;
                let text = match frame {
                    Message::Text(text) => text,
                    Message::Close(_) => break,
                    _ => continue,
                };

                match ServerMessage::decode(text.as_str())? {
                    ServerMessage::ConnectionAck { .. } if !subscribed => {
                        ws.send(Message::Text(subscribe.encode()?.into()))
                            .await
                            .map_err(|e| Error::WebSocketConnect(e.to_string()))?;
                        subscribed = true;
                    }
                    ServerMessage::Ping { .. } => {
                        let pong = ClientMessage::Pong { payload: None };
                        ws.send(Message::Text(pong.encode()?.into()))
                            .await
                            .map_err(|e| Error::WebSocketConnect(e.to_string()))?;
                    }
                    ServerMessage::Next { payload, .. } => yield payload,
                    ServerMessage::Error { payload, .. } => {
                        yield GraphQlResponse { data: None, errors: payload };
                        break;
                    }
                    ServerMessage::Complete { .. } => break,
                    ServerMessage::ConnectionAck { .. } | ServerMessage::Pong { .. } => {}
                }
            }
        };

        Box::pin(stream)
    }
}

/// Map `http(s)://` to `ws(s)://` keeping host, port and path.
fn websocket_url(endpoint: &Url) -> Result<Url, Error> {
    let scheme = match endpoint.scheme() {
        "https" | "wss" => "wss",
        _ => "ws",
    };
    let mut ws = endpoint.clone();
    ws.set_scheme(scheme)
        .map_err(|()| Error::WebSocketConnect(format!("cannot derive ws URL from {endpoint}")))?;
    Ok(ws)
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_owned(),
    }
}
