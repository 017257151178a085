// connect-api: wire layer for the mothership relay (envelopes, graphql-ws, local GraphQL)

pub mod digest;
pub mod envelope;
pub mod error;
pub mod local;
pub mod protocol;
pub mod relay;
pub mod transport;
pub mod websocket;

pub use envelope::{
    AccessUrl, ClientInfo, ClientType, GraphQlError, GraphQlRequest, GraphQlResponse, Importance,
    Notification, RelayEnvelope, RelayEvent, RelayedRequest, RemoteAccessAction,
    RemoteAccessEvent, RemoteGraphQlEventType, UrlType,
};
pub use error::Error;
pub use local::LocalGraphQlClient;
pub use relay::{Inbound, Outbound, RelayConnector, RelayLink, RelayPeer};
pub use transport::{TlsMode, TransportConfig};
pub use websocket::{DeviceInfo, MothershipConnector};
