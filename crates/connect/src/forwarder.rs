// Port forwarding for the daemon. STATIC only: the operator forwards the
// WAN port on their router, so opening and closing just publish or
// withdraw the URL. No UPNP gateway is ever reported.

use std::net::Ipv6Addr;

use connect_api::{AccessUrl, UrlType};
use connect_core::{CoreError, Forwarding, Lease, PortForwarder};
use futures_util::future::BoxFuture;
use tracing::{debug, info};
use url::Url;

#[derive(Debug, Clone)]
pub struct StaticForwarder {
    wan_host: Option<String>,
}

impl StaticForwarder {
    pub fn new(wan_host: Option<String>) -> Self {
        Self { wan_host }
    }

    fn url(&self, port: u16) -> Result<AccessUrl, CoreError> {
        let host = self
            .wan_host
            .as_deref()
            .ok_or_else(|| CoreError::PortForwarding {
                message: "remote_access.wan_host is not set".into(),
            })?;

        let (text, v6) = if host.parse::<Ipv6Addr>().is_ok() {
            (format!("https://[{host}]:{port}"), true)
        } else {
            (format!("https://{host}:{port}"), false)
        };
        let url = Url::parse(&text).map_err(|e| CoreError::PortForwarding {
            message: format!("invalid WAN URL {text}: {e}"),
        })?;

        Ok(AccessUrl {
            kind: UrlType::Wan,
            name: Some("WAN".into()),
            ipv4: (!v6).then(|| url.clone()),
            ipv6: v6.then_some(url),
        })
    }
}

fn no_upnp() -> CoreError {
    CoreError::PortForwarding {
        message: "UPNP is not supported by this forwarder".into(),
    }
}

impl PortForwarder for StaticForwarder {
    fn supports_upnp(&self) -> bool {
        false
    }

    fn open_static(&self, port: u16) -> BoxFuture<'_, Result<AccessUrl, CoreError>> {
        Box::pin(async move {
            let url = self.url(port)?;
            info!(port, "static remote access published");
            Ok(url)
        })
    }

    fn open_upnp(&self, _desired_port: u16) -> BoxFuture<'_, Result<(AccessUrl, Lease), CoreError>> {
        Box::pin(async { Err(no_upnp()) })
    }

    fn renew<'a>(&'a self, _lease: &'a Lease) -> BoxFuture<'a, Result<(), CoreError>> {
        Box::pin(async { Err(no_upnp()) })
    }

    fn close<'a>(&'a self, forwarding: &'a Forwarding) -> BoxFuture<'a, Result<(), CoreError>> {
        Box::pin(async move {
            debug!(?forwarding, "static remote access withdrawn");
            Ok(())
        })
    }
}
