//! S1, S2, S5 from spec.md §8, driven against a real `Connection` talking to
//! an in-process stub WebSocket peer (see `support`), closing the gap the
//! component-level tests in `scenarios.rs` leave open.

mod support;

use std::sync::Arc;
use std::time::Duration;
use support::{PeerCommand, StubPeer};
use sync_core::client::{ClientResetObservation, SyncClient};
use sync_core::config::EngineConfig;
use sync_core::connection::ConnectionState;
use sync_core::coordinator::RealmCoordinator;

async fn wait_until(mut pred: impl FnMut() -> bool, timeout: Duration) -> bool {
    let start = tokio::time::Instant::now();
    loop {
        if pred() {
            return true;
        }
        if start.elapsed() > timeout {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn test_config(dir: &std::path::Path, peer_addr: std::net::SocketAddr) -> EngineConfig {
    let mut config = EngineConfig::parse_from(["test"]);
    config.base_file_path = dir.to_path_buf();
    config.server_host = peer_addr.ip().to_string();
    config.server_port = peer_addr.port();
    config
}

/// S1 — partition sync round trip: BIND, server-assigned IDENT, one steady
/// DOWNLOAD integrated immediately, one observer notification.
#[tokio::test(flavor = "multi_thread")]
async fn s1_partition_sync_round_trip_applies_one_download() {
    let mut peer = StubPeer::bind().await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path(), peer.addr);
    config.flexible_sync = false;

    let coordinator = Arc::new(RealmCoordinator::new_in_memory());
    let (_notifier_id, mut notifications) = coordinator.notifier.register(0);

    let _client_task = SyncClient::spawn(
        config.endpoint(),
        dir.path().join("default.realm"),
        1,
        config.clone(),
        coordinator.clone(),
        None,
    );

    let mut conn = peer.accept().await;

    let bind_frame = tokio::time::timeout(Duration::from_secs(2), conn.inbound.recv())
        .await
        .expect("client never sent BIND")
        .unwrap();
    let bind: serde_json::Value = serde_json::from_slice(&bind_frame).unwrap();
    assert_eq!(bind["kind"], "Bind");
    assert_eq!(bind["is_flx"], false);

    let ident = serde_json::json!({"kind": "Ident", "session_ident": 1, "ident": 1234, "salt": 42});
    conn.outbound.send(PeerCommand::Send(serde_json::to_vec(&ident).unwrap())).unwrap();

    let echoed_frame = tokio::time::timeout(Duration::from_secs(2), conn.inbound.recv())
        .await
        .expect("client never echoed IDENT")
        .unwrap();
    let echoed: serde_json::Value = serde_json::from_slice(&echoed_frame).unwrap();
    assert_eq!(echoed["kind"], "Ident");
    assert_eq!(echoed["ident"], 1234);

    let download = serde_json::json!({
        "kind": "Download",
        "session_ident": 1,
        "header": {
            "download_cursor": 1,
            "upload_cursor": 1,
            "latest_server_version": {"version": 1, "salt": 1},
            "downloadable_bytes": 0,
            "last_in_batch": true,
            "query_version": 0,
            "num_changesets": 0
        }
    });
    conn.outbound.send(PeerCommand::Send(serde_json::to_vec(&download).unwrap())).unwrap();

    assert!(wait_until(|| coordinator.current_version() == 1, Duration::from_secs(2)).await);

    let notified = tokio::time::timeout(Duration::from_secs(2), notifications.recv())
        .await
        .expect("no notification delivered")
        .expect("notifier channel closed");
    assert_eq!(notified.target_version, 1);
}

/// S2 — PONG timeout: the stub stops answering heartbeat PINGs, the
/// connection tears down with `pong_timeout`, and reconnects after a
/// jittered `[750ms, 1000ms]` delay once the stub answers again.
#[tokio::test(flavor = "multi_thread")]
async fn s2_pong_timeout_then_reconnect_within_jittered_window() {
    let mut peer = StubPeer::bind().await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path(), peer.addr);
    config.ping_keepalive_period_ms = 150;

    let coordinator = Arc::new(RealmCoordinator::new_in_memory());

    let (events_tx, mut events_rx) = tokio::sync::mpsc::unbounded_channel();
    let (connection, _conn_task) = sync_core::connection::Connection::spawn(
        config.endpoint(),
        config.clone(),
        config.flexible_sync,
        events_tx,
    );
    connection.activate();
    let _ = coordinator; // not exercised directly in this scenario

    let mut conn = peer.accept().await;
    conn.outbound.send(PeerCommand::DropPongs(true)).unwrap();

    // Drain StateChanged(Connecting) and StateChanged(Connected).
    assert!(wait_for_state(&mut events_rx, ConnectionState::Connected, Duration::from_secs(2)).await);

    let disconnected_at = tokio::time::Instant::now();
    assert!(wait_for_termination(&mut events_rx, Duration::from_secs(3)).await);
    assert!(wait_for_state(&mut events_rx, ConnectionState::Disconnected, Duration::from_secs(1)).await);

    conn.outbound.send(PeerCommand::DropPongs(false)).unwrap();

    assert!(wait_for_state(&mut events_rx, ConnectionState::Connecting, Duration::from_secs(2)).await);
    let elapsed = disconnected_at.elapsed();
    assert!(elapsed >= Duration::from_millis(700), "reconnect fired too early: {elapsed:?}");
    assert!(elapsed <= Duration::from_millis(1500), "reconnect fired too late: {elapsed:?}");

    let _second_conn = peer.accept().await;
    assert!(wait_for_state(&mut events_rx, ConnectionState::Connected, Duration::from_secs(2)).await);
}

async fn wait_for_state(
    events: &mut tokio::sync::mpsc::UnboundedReceiver<sync_core::connection::ConnectionEvent>,
    want: ConnectionState,
    timeout: Duration,
) -> bool {
    tokio::time::timeout(timeout, async {
        while let Some(event) = events.recv().await {
            if let sync_core::connection::ConnectionEvent::StateChanged(state) = event {
                if state == want {
                    return true;
                }
            }
        }
        false
    })
    .await
    .unwrap_or(false)
}

async fn wait_for_termination(
    events: &mut tokio::sync::mpsc::UnboundedReceiver<sync_core::connection::ConnectionEvent>,
    timeout: Duration,
) -> bool {
    tokio::time::timeout(timeout, async {
        while let Some(event) = events.recv().await {
            if matches!(event, sync_core::connection::ConnectionEvent::Terminated(_)) {
                return true;
            }
        }
        false
    })
    .await
    .unwrap_or(false)
}

/// S5 — client reset with recovery: server sends `ERROR(action=ClientReset)`;
/// the before-listener sees the frozen pre-reset version, the after-listener
/// sees a new version once the reset orchestrator merges.
#[tokio::test(flavor = "multi_thread")]
async fn s5_client_reset_emits_before_and_after_observations() {
    let mut peer = StubPeer::bind().await;
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), peer.addr);

    let coordinator = Arc::new(RealmCoordinator::new_in_memory());
    // A pre-reset local write, establishing V_old.
    let read = coordinator.begin_read(None, false);
    let write = coordinator.promote_to_write(read);
    let v_old = coordinator.commit_write(write);
    assert_eq!(v_old, 1);

    let (obs_tx, mut obs_rx) = tokio::sync::mpsc::unbounded_channel();
    let observer: sync_core::client::ClientResetObserver = Box::new(move |observation| {
        let _ = obs_tx.send(observation);
    });

    let _client_task = SyncClient::spawn(
        config.endpoint(),
        dir.path().join("default.realm"),
        1,
        config.clone(),
        coordinator.clone(),
        Some(observer),
    );

    let mut conn = peer.accept().await;
    let _bind_frame = tokio::time::timeout(Duration::from_secs(2), conn.inbound.recv()).await.unwrap().unwrap();

    let error = serde_json::json!({
        "kind": "Error",
        "raw_error_code": 211,
        "message": "client reset required",
        "try_again": false,
        "action": "ClientReset",
        "resumption_delay_info": null,
        "session_ident": 1
    });
    conn.outbound.send(PeerCommand::Send(serde_json::to_vec(&error).unwrap())).unwrap();

    let before = tokio::time::timeout(Duration::from_secs(2), obs_rx.recv())
        .await
        .expect("no before-reset observation")
        .expect("observer channel closed");
    match before {
        ClientResetObservation::Before { frozen_version } => assert_eq!(frozen_version, v_old),
        ClientResetObservation::After { .. } => panic!("expected Before first"),
    }

    let after = tokio::time::timeout(Duration::from_secs(2), obs_rx.recv())
        .await
        .expect("no after-reset observation")
        .expect("observer channel closed");
    match after {
        ClientResetObservation::After { new_version } => assert!(new_version > v_old),
        ClientResetObservation::Before { .. } => panic!("expected After second"),
    }
}
