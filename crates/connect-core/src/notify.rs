// ── Notification forwarder ──
//
// At-most-once delivery of local notifications to mothership. No queue,
// no retry: while the relay is not CONNECTED the call fails immediately.

use connect_api::{Notification, Outbound};
use tracing::debug;

use crate::error::CoreError;
use crate::supervisor::RelayHandle;

#[derive(Debug, Clone)]
pub struct NotificationForwarder {
    relay: RelayHandle,
}

impl NotificationForwarder {
    pub fn new(relay: RelayHandle) -> Self {
        Self { relay }
    }

    /// Send `notification` if CONNECTED, else fail with `MothershipDown`.
    ///
    /// Never blocks. A full outbound queue is reported as backpressure.
    pub fn forward(&self, notification: Notification) -> Result<(), CoreError> {
        let title = notification.title.clone();
        self.relay.try_send(Outbound::Notification(notification))?;
        debug!(%title, "notification forwarded");
        Ok(())
    }
}
