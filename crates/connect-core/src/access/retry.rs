// Bounded retry for port forwarding calls. Every attempt runs under the
// call timeout; a timeout counts as a failure.

use std::future::Future;

use tracing::warn;

use crate::config::RemoteAccessConfig;
use crate::error::CoreError;

pub(crate) async fn with_retry<T, F, Fut>(
    operation: &str,
    config: &RemoteAccessConfig,
    mut call: F,
) -> Result<T, CoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CoreError>>,
{
    let attempts = config.retry_attempts.max(1);
    let mut delay = config.retry_base;
    let mut last = CoreError::Internal(format!("{operation} was never attempted"));

    for attempt in 1..=attempts {
        match tokio::time::timeout(config.call_timeout, call()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => last = e,
            Err(_) => last = CoreError::timeout(operation, config.call_timeout),
        }

        warn!(operation, attempt, attempts, error = %last, "port forwarding call failed");
        if attempt < attempts {
            tokio::time::sleep(delay).await;
            delay = delay.saturating_mul(2);
        }
    }

    Err(last)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use super::*;

    fn config(attempts: u32) -> RemoteAccessConfig {
        RemoteAccessConfig {
            retry_attempts: attempts,
            retry_base: Duration::from_millis(100),
            call_timeout: Duration::from_secs(1),
            ..RemoteAccessConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = with_retry("openStatic", &config(3), || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(CoreError::PortForwarding {
                    message: "router busy".into(),
                })
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_bounded_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry("openUpnp", &config(2), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CoreError::PortForwarding {
                message: "denied".into(),
            })
        })
        .await;

        assert!(matches!(result, Err(CoreError::PortForwarding { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_counts_as_failure() {
        let result: Result<(), _> = with_retry("renew", &config(1), || async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(CoreError::Timeout { ref operation, timeout_ms: 1000 }) if operation == "renew"));
    }
}
