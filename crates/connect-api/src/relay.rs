//! Transport seam between the reconnect supervisor and the wire.
//!
//! A [`RelayConnector`] opens one [`RelayLink`] per connection attempt.
//! The link is a pair of typed channels plus a cancellation token: the
//! connector's own pump task owns the socket, so the supervisor never
//! blocks on socket I/O and any number of producers can hold a clone of
//! the outbound sender.

use futures_util::future::BoxFuture;
use secrecy::SecretString;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::envelope::{Notification, RelayEnvelope, RemoteAccessEvent};
use crate::error::Error;

/// Messages the device sends to mothership.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Keepalive probe. Answered by [`Inbound::Pong`].
    Ping,
    /// Result of relayed GraphQL work.
    Response(RelayEnvelope),
    /// Remote-access acknowledgement.
    RemoteAccess(RemoteAccessEvent),
    /// Local notification.
    Notification(Notification),
}

/// Messages mothership sends to the device.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Keepalive acknowledgement.
    Pong,
    /// One raw event from the event stream, not yet decoded.
    Event(serde_json::Value),
}

/// One live connection.
///
/// `inbound` yields `Err` for transport faults; a closed `inbound` means
/// the peer went away. Dropping the link cancels the pump.
#[derive(Debug)]
pub struct RelayLink {
    pub outbound: mpsc::Sender<Outbound>,
    pub inbound: mpsc::Receiver<Result<Inbound, Error>>,
    cancel: CancellationToken,
}

impl RelayLink {
    pub fn new(
        outbound: mpsc::Sender<Outbound>,
        inbound: mpsc::Receiver<Result<Inbound, Error>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            outbound,
            inbound,
            cancel,
        }
    }

    /// Build a link whose other end is returned as a [`RelayPeer`].
    ///
    /// Used by in-process transports and tests.
    pub fn loopback(capacity: usize) -> (Self, RelayPeer) {
        let (out_tx, out_rx) = mpsc::channel(capacity);
        let (in_tx, in_rx) = mpsc::channel(capacity);
        let cancel = CancellationToken::new();
        let peer = RelayPeer {
            outbound: out_rx,
            inbound: in_tx,
            cancel: cancel.clone(),
        };
        (Self::new(out_tx, in_rx, cancel), peer)
    }

    /// Close the underlying transport.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for RelayLink {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// The far end of a [`RelayLink::loopback`] link.
#[derive(Debug)]
pub struct RelayPeer {
    pub outbound: mpsc::Receiver<Outbound>,
    pub inbound: mpsc::Sender<Result<Inbound, Error>>,
    pub cancel: CancellationToken,
}

/// Opens authenticated links to a mothership endpoint.
pub trait RelayConnector: Send + Sync {
    /// Connect and complete the protocol handshake.
    ///
    /// Resolves once the server acknowledged the session; the keepalive
    /// round-trip is left to the caller.
    fn connect<'a>(
        &'a self,
        endpoint: &'a Url,
        api_key: &'a SecretString,
    ) -> BoxFuture<'a, Result<RelayLink, Error>>;
}
