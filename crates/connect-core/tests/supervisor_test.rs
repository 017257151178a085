#![allow(clippy::unwrap_used)]

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use connect_api::{Error as ApiError, Inbound, Outbound};
use pretty_assertions::assert_eq;

use common::{FakeExecutor, FakeForwarder, Harness, Step, complete_handshake};
use connect_core::{AccessType, ConnectionPhase, ConnectionStatus};

fn record(harness: &Harness) -> Arc<Mutex<Vec<ConnectionStatus>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    harness
        .connect
        .on_status_change(move |status| sink.lock().unwrap().push(status.clone()));
    seen
}

fn phases(seen: &Mutex<Vec<ConnectionStatus>>) -> Vec<ConnectionPhase> {
    seen.lock().unwrap().iter().map(|s| s.phase).collect()
}

fn harness(script: Vec<Step>) -> Harness {
    Harness::new(
        script,
        FakeExecutor::default(),
        FakeForwarder::new(false),
        AccessType::Disabled,
    )
}

#[tokio::test(start_paused = true)]
async fn healthy_start_reaches_connected() {
    let mut h = harness(Vec::new());
    assert_eq!(h.connect.connection_status().phase, ConnectionPhase::PreInit);
    let seen = record(&h);

    assert!(h.connect.start().await);
    let mut peer = h.peers.recv().await.unwrap();
    complete_handshake(&mut peer).await;

    let status = h
        .connect
        .subscribe_status()
        .wait_for(|s| s.is_connected())
        .await
        .unwrap()
        .clone();

    assert_eq!(status.error, None);
    assert_eq!(status.timeout_ms, None);
    assert_eq!(
        phases(&seen),
        vec![ConnectionPhase::Connecting, ConnectionPhase::Connected]
    );
}

#[tokio::test(start_paused = true)]
async fn start_is_idempotent() {
    let mut h = harness(Vec::new());

    assert!(h.connect.start().await);
    assert!(!h.connect.start().await);

    let mut peer = h.peers.recv().await.unwrap();
    complete_handshake(&mut peer).await;
    common::settle().await;

    assert!(!h.connect.start().await);
    assert_eq!(h.connector.connects(), 1);
    assert!(h.connect.connection_status().is_connected());
}

#[tokio::test(start_paused = true)]
async fn failures_back_off_monotonically() {
    let script = (0..5)
        .map(|_| Step::Fail(ApiError::WebSocketConnect("connection refused".into())))
        .collect();
    let h = harness(script);
    let seen = record(&h);

    h.connect.start().await;
    h.connect
        .subscribe_status()
        .wait_for(|s| s.phase == ConnectionPhase::ErrorRetrying && s.attempt >= 5)
        .await
        .unwrap();

    let retries: Vec<ConnectionStatus> = seen
        .lock()
        .unwrap()
        .iter()
        .filter(|s| s.phase == ConnectionPhase::ErrorRetrying)
        .cloned()
        .collect();
    assert_eq!(retries.len(), 5);

    let delays: Vec<u64> = retries.iter().map(|s| s.timeout_ms.unwrap()).collect();
    assert!(
        delays.windows(2).all(|w| w[0] <= w[1]),
        "delays must not shrink: {delays:?}"
    );
    assert!(delays.iter().all(|&ms| ms <= 30_000));
    for status in &retries {
        assert!(status.error.as_deref().unwrap().contains("connection refused"));
    }
}

#[tokio::test(start_paused = true)]
async fn recovers_after_failure() {
    let mut h = harness(vec![Step::Fail(ApiError::WebSocketConnect(
        "connection refused".into(),
    ))]);
    let seen = record(&h);

    h.connect.start().await;
    let mut peer = h.peers.recv().await.unwrap();
    complete_handshake(&mut peer).await;
    h.connect
        .subscribe_status()
        .wait_for(|s| s.is_connected())
        .await
        .unwrap();

    assert_eq!(
        phases(&seen),
        vec![
            ConnectionPhase::Connecting,
            ConnectionPhase::ErrorRetrying,
            ConnectionPhase::Connecting,
            ConnectionPhase::Connected,
        ]
    );
    assert_eq!(h.connector.connects(), 2);
    assert_eq!(h.connect.connection_status().error, None);
}

#[tokio::test(start_paused = true)]
async fn auth_rejection_is_reported() {
    let h = harness(vec![Step::Fail(ApiError::AuthRejected {
        reason: "invalid API key".into(),
    })]);

    h.connect.start().await;
    let status = h
        .connect
        .subscribe_status()
        .wait_for(|s| s.phase == ConnectionPhase::ErrorRetrying)
        .await
        .unwrap()
        .clone();

    assert!(status.error.unwrap().contains("invalid API key"));
    assert!(status.timeout_ms.unwrap() > 0);
}

#[tokio::test(start_paused = true)]
async fn hung_handshake_times_out() {
    let h = harness(vec![Step::Hang]);

    h.connect.start().await;
    let status = h
        .connect
        .subscribe_status()
        .wait_for(|s| s.phase == ConnectionPhase::ErrorRetrying)
        .await
        .unwrap()
        .clone();

    assert!(status.error.unwrap().contains("handshake timed out"));
}

#[tokio::test(start_paused = true)]
async fn missing_pong_is_a_ping_failure() {
    let mut h = harness(Vec::new());
    let seen = record(&h);

    h.connect.start().await;
    let mut peer = h.peers.recv().await.unwrap();
    complete_handshake(&mut peer).await;

    // The next keepalive goes unanswered.
    assert_eq!(peer.outbound.recv().await, Some(Outbound::Ping));
    let status = h
        .connect
        .subscribe_status()
        .wait_for(|s| s.phase == ConnectionPhase::PingFailure)
        .await
        .unwrap()
        .clone();

    assert!(status.error.is_some());
    assert_eq!(status.timeout_ms, None);
    assert!(peer.cancel.is_cancelled());

    // And the supervisor tries again.
    let mut next = h.peers.recv().await.unwrap();
    complete_handshake(&mut next).await;
    h.connect
        .subscribe_status()
        .wait_for(|s| s.is_connected())
        .await
        .unwrap();

    let phases = phases(&seen);
    let failure = phases
        .iter()
        .position(|p| *p == ConnectionPhase::PingFailure)
        .unwrap();
    assert_eq!(phases[failure + 1], ConnectionPhase::Connecting);
}

#[tokio::test(start_paused = true)]
async fn answered_keepalives_keep_the_link() {
    let mut h = harness(Vec::new());

    h.connect.start().await;
    let mut peer = h.peers.recv().await.unwrap();
    complete_handshake(&mut peer).await;

    for _ in 0..3 {
        assert_eq!(peer.outbound.recv().await, Some(Outbound::Ping));
        peer.inbound.send(Ok(Inbound::Pong)).await.unwrap();
    }

    assert!(h.connect.connection_status().is_connected());
    assert_eq!(h.connector.connects(), 1);
}

#[tokio::test(start_paused = true)]
async fn transport_error_drops_to_error_retrying() {
    let mut h = harness(Vec::new());

    h.connect.start().await;
    let mut peer = h.peers.recv().await.unwrap();
    complete_handshake(&mut peer).await;
    h.connect
        .subscribe_status()
        .wait_for(|s| s.is_connected())
        .await
        .unwrap();

    peer.inbound
        .send(Err(ApiError::WebSocketClosed {
            code: 1001,
            reason: "restarting".into(),
        }))
        .await
        .unwrap();

    let status = h
        .connect
        .subscribe_status()
        .wait_for(|s| s.phase == ConnectionPhase::ErrorRetrying)
        .await
        .unwrap()
        .clone();
    assert!(status.error.unwrap().contains("restarting"));
}

#[tokio::test(start_paused = true)]
async fn stop_is_terminal() {
    let h = harness(vec![Step::Hang]);

    h.connect.start().await;
    common::settle().await;
    assert_eq!(h.connect.connection_status().phase, ConnectionPhase::Connecting);

    h.connect.stop().await;
    assert_eq!(h.connect.connection_status().phase, ConnectionPhase::Stopped);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.connect.connection_status().phase, ConnectionPhase::Stopped);
    assert!(!h.connect.start().await);
    assert_eq!(h.connector.connects(), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_while_connected_closes_the_link() {
    let mut h = harness(Vec::new());

    h.connect.start().await;
    let mut peer = h.peers.recv().await.unwrap();
    complete_handshake(&mut peer).await;
    common::settle().await;

    h.connect.stop().await;

    assert!(peer.cancel.is_cancelled());
    assert_eq!(h.connect.connection_status().phase, ConnectionPhase::Stopped);
}

// ── Backoff reset ───────────────────────────────────────────────────

fn refused(n: usize) -> Vec<Step> {
    (0..n)
        .map(|_| Step::Fail(ApiError::WebSocketConnect("connection refused".into())))
        .collect()
}

/// Fail three times, then hold a link for `hold` before it drops.
async fn retry_after_link_held_for(hold: Duration) -> ConnectionStatus {
    let mut h = harness(refused(3));

    h.connect.start().await;
    let mut peer = h.peers.recv().await.unwrap();
    complete_handshake(&mut peer).await;
    let mut status = h.connect.subscribe_status();
    status.wait_for(|s| s.is_connected()).await.unwrap();
    assert_eq!(h.connector.connects(), 4);

    let started = tokio::time::Instant::now();
    let interval = Duration::from_secs(30);
    while started.elapsed() + interval <= hold {
        assert_eq!(peer.outbound.recv().await, Some(Outbound::Ping));
        peer.inbound.send(Ok(Inbound::Pong)).await.unwrap();
    }
    tokio::time::sleep_until(started + hold).await;
    assert!(h.connect.connection_status().is_connected());

    peer.inbound
        .send(Err(ApiError::WebSocketClosed {
            code: 1001,
            reason: "going away".into(),
        }))
        .await
        .unwrap();

    status
        .wait_for(|s| s.phase == ConnectionPhase::ErrorRetrying)
        .await
        .unwrap()
        .clone()
}

#[tokio::test(start_paused = true)]
async fn stable_connection_resets_backoff() {
    let status = retry_after_link_held_for(Duration::from_secs(65)).await;

    assert_eq!(status.attempt, 1);
    // base 500ms with 20% jitter
    assert!(status.timeout_ms.unwrap() <= 600, "{status:?}");
}

#[tokio::test(start_paused = true)]
async fn short_connection_keeps_backing_off() {
    let status = retry_after_link_held_for(Duration::from_secs(10)).await;

    assert_eq!(status.attempt, 4);
    // 500ms * 2^3 with 20% jitter
    assert!(status.timeout_ms.unwrap() >= 3_200, "{status:?}");
}
