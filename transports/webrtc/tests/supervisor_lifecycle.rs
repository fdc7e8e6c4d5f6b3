//! Guest lifecycle integration tests
//!
//! Runs a real host fanout and guest supervisors over the in-memory relay
//! and mock transports, injecting faults to drive the reconnection paths.

mod harness;

use harness::{is_up, wait_status, Lobby, HOST_ID, LOBBY};
use tokio::time::{sleep, timeout, Duration};
use tuneperfect_webrtc::peer::{ConnectionState, Role, SdpKind, TransportEvent};
use tuneperfect_webrtc::signaling::{GoodbyeReason, HostSignaling, MemoryRelay, SignalMessage};
use tuneperfect_webrtc::supervisor::SupervisorNotice;
use tuneperfect_webrtc::testing::{MockNetwork, MockOp};

fn offers(network: &MockNetwork) -> usize {
    network
        .ops()
        .iter()
        .filter(|op| matches!(op, MockOp::CreateOffer { .. }))
        .count()
}

#[tokio::test]
async fn test_overlapping_connects_keep_one_live_connection() {
    let lobby = Lobby::open().await;
    let guest = lobby.guest("u1");

    guest.start_connection("u1");
    guest.connect("u1").await;
    guest.start_connection("u1");

    wait_status(&guest, "link up", is_up).await;
    assert_eq!(offers(&lobby.network), 1);
    assert_eq!(lobby.live_guest_transports(), 1);

    // Already up: nothing to do
    guest.connect("u1").await;
    assert_eq!(offers(&lobby.network), 1);
    assert_eq!(lobby.host.guest_count().await, 1);
}

#[tokio::test]
async fn test_connect_replaces_connection_without_channel() {
    let lobby = Lobby::open().await;
    lobby.network.stall_connections(true);

    let guest = lobby.guest("u1");
    guest.start_connection("u1");

    let network = &lobby.network;
    harness::eventually("answer applied", move || async move {
        network.ops().iter().any(|op| {
            matches!(
                op,
                MockOp::SetRemoteDescription {
                    kind: SdpKind::Answer,
                    ..
                }
            )
        })
    })
    .await;

    // Network up, data channel never opened
    let first = lobby.network.latest(Role::Guest).expect("guest transport");
    first.emit(TransportEvent::StateChanged(ConnectionState::Connected));
    let status = wait_status(&guest, "connected without channel", |s| {
        s.state == ConnectionState::Connected && !s.connecting
    })
    .await;
    assert!(!status.channel_ready);

    lobby.network.stall_connections(false);
    guest.connect("u1").await;
    wait_status(&guest, "link up", is_up).await;

    assert!(first.is_closed());
    assert_eq!(lobby.live_guest_transports(), 1);
    assert_eq!(offers(&lobby.network), 2);

    // The first attempt no longer hears the guest channel
    let second = lobby.network.latest(Role::Guest).expect("guest transport");
    assert_ne!(second.id(), first.id());
    let untouched = lobby.network.ops_for(first.id());

    lobby
        .relay
        .host(LOBBY)
        .send_signal(
            SignalMessage::ice_candidate("mock-candidate:77", HOST_ID, Some("u1".to_string())),
            "u1",
        )
        .await
        .expect("send candidate");

    let second_id = second.id();
    harness::eventually("candidate applied", move || async move {
        network.ops_for(second_id).iter().any(|op| {
            matches!(op, MockOp::AddCandidate { candidate, .. } if candidate == "mock-candidate:77")
        })
    })
    .await;
    assert_eq!(lobby.network.ops_for(first.id()), untouched);
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let lobby = Lobby::open().await;
    let guest = lobby.connected_guest("u1").await;

    guest.disconnect().await;
    guest.disconnect().await;

    let status = guest.status().borrow().clone();
    assert_eq!(status.state, ConnectionState::New);
    assert!(!status.channel_ready);
    assert!(!status.retry_pending);
    assert_eq!(status.active_user.as_deref(), Some("u1"));
    assert!(guest.client().is_none());
    assert_eq!(lobby.live_guest_transports(), 0);

    // No retry sneaks in afterwards
    sleep(Duration::from_millis(300)).await;
    assert_eq!(guest.state(), ConnectionState::New);
    assert_eq!(offers(&lobby.network), 1);
}

#[tokio::test]
async fn test_backoff_notifies_once_then_recovers() {
    let lobby = Lobby::open().await;
    lobby.network.fail_offers(true);

    let guest = lobby.guest("u1");
    let mut notices = guest.notices();
    guest.start_connection("u1");

    let notice = timeout(Duration::from_secs(3), notices.recv())
        .await
        .expect("Timed out waiting for notice")
        .expect("Notice channel closed");
    assert_eq!(notice, SupervisorNotice::ConnectionTrouble { attempts: 2 });

    // First attempt plus two retries
    assert_eq!(offers(&lobby.network), 3);
    let status = guest.status().borrow().clone();
    assert_eq!(status.state, ConnectionState::Failed);
    assert!(status.retry_pending);
    assert!(status
        .last_error
        .as_deref()
        .is_some_and(|e| e.contains("mock offer failure")));

    lobby.network.fail_offers(false);
    let status = wait_status(&guest, "link up", is_up).await;
    assert_eq!(status.attempts, 0);
    assert!(status.last_error.is_none());
    assert!(notices.try_recv().is_err());
}

#[tokio::test]
async fn test_plain_connect_is_not_retried() {
    let lobby = Lobby::open().await;
    lobby.network.fail_offers(true);

    let guest = lobby.guest("u1");
    guest.connect("u1").await;

    let status = guest.status().borrow().clone();
    assert_eq!(status.state, ConnectionState::Failed);
    assert!(status.last_error.is_some());
    assert!(!status.retry_pending);
    assert!(status.active_user.is_none());

    sleep(Duration::from_millis(300)).await;
    assert_eq!(offers(&lobby.network), 1);
}

#[tokio::test]
async fn test_host_goodbye_suppresses_retry() {
    let lobby = Lobby::open().await;
    let guest = lobby.connected_guest("u1").await;

    lobby.host.stop().await;

    let status = wait_status(&guest, "goodbye handled", |s| {
        s.active_user.is_none() && s.state == ConnectionState::New
    })
    .await;
    assert!(!status.retry_pending);
    assert!(lobby.sent_to("u1").iter().any(|m| matches!(
        m,
        SignalMessage::Goodbye {
            reason: GoodbyeReason::LobbyClosed,
            ..
        }
    )));

    sleep(Duration::from_millis(400)).await;
    assert_eq!(offers(&lobby.network), 1);
    assert_eq!(guest.state(), ConnectionState::New);
}

#[tokio::test]
async fn test_goodbye_while_connecting_suppresses_retry() {
    let lobby = Lobby::open().await;
    lobby.network.stall_connections(true);

    let guest = lobby.guest("u1");
    guest.start_connection("u1");

    let host = &lobby.host;
    harness::eventually("offer reached host", move || async move {
        host.guest_count().await == 1
    })
    .await;
    assert_eq!(guest.state(), ConnectionState::Connecting);

    lobby
        .relay
        .host(LOBBY)
        .send_signal(
            SignalMessage::goodbye(HOST_ID, GoodbyeReason::LobbyClosed),
            "u1",
        )
        .await
        .expect("send goodbye");

    let status = wait_status(&guest, "goodbye handled", |s| {
        s.active_user.is_none() && s.state == ConnectionState::New
    })
    .await;
    assert!(!status.retry_pending);
    assert!(!status.connecting);
    assert_eq!(lobby.live_guest_transports(), 0);

    // Past the connection timeout and the first retry delay
    sleep(Duration::from_millis(600)).await;
    assert_eq!(guest.state(), ConnectionState::New);
    assert!(guest.status().borrow().last_error.is_none());
    assert_eq!(offers(&lobby.network), 1);
}

#[tokio::test]
async fn test_stop_connection_says_goodbye() {
    let lobby = Lobby::open().await;
    let guest = lobby.connected_guest("u1").await;

    guest.stop_connection().await;

    assert!(lobby.sent_to_host().iter().any(|m| matches!(
        m,
        SignalMessage::Goodbye {
            reason: GoodbyeReason::UserLeft,
            ..
        }
    )));
    let status = guest.status().borrow().clone();
    assert_eq!(status.state, ConnectionState::New);
    assert!(status.active_user.is_none());

    let host = &lobby.host;
    harness::eventually("guest removed", move || async move {
        host.guest_count().await == 0
    })
    .await;
}

#[tokio::test]
async fn test_heartbeat_keeps_healthy_link() {
    let lobby = Lobby::open().await;
    let guest = lobby.connected_guest("u1").await;

    // Several ping rounds
    sleep(Duration::from_millis(700)).await;

    let status = guest.status().borrow().clone();
    assert!(is_up(&status));
    assert!(status.last_error.is_none());
    assert_eq!(offers(&lobby.network), 1);
}

#[tokio::test]
async fn test_silent_link_is_replaced() {
    let lobby = Lobby::open().await;
    let guest = lobby.connected_guest("u1").await;
    let first = guest.client().expect("client").connection_id();

    // Transport still says connected, but nothing gets through
    lobby.network.drop_messages(true);
    let status = wait_status(&guest, "heartbeat failure", |s| s.last_error.is_some()).await;
    assert!(status
        .last_error
        .as_deref()
        .is_some_and(|e| e.contains("timeout")));
    lobby.network.drop_messages(false);

    wait_status(&guest, "link back up", |s| is_up(s) && s.last_error.is_none()).await;
    let client = guest.require_client().expect("client");
    assert_ne!(client.connection_id(), first);
    assert_eq!(lobby.live_guest_transports(), 1);

    let songs = client.list_songs().await.expect("songs.list");
    assert_eq!(songs.len(), 2);
}

#[tokio::test]
async fn test_transport_failure_triggers_reconnect() {
    let lobby = Lobby::open().await;
    let guest = lobby.connected_guest("u1").await;

    let transport = lobby.network.latest(Role::Guest).expect("guest transport");
    transport.emit(TransportEvent::StateChanged(ConnectionState::Failed));

    let status = wait_status(&guest, "retry armed", |s| s.retry_pending).await;
    assert!(!status.channel_ready);
    assert!(guest.client().is_none());

    wait_status(&guest, "link back up", is_up).await;
    assert_eq!(offers(&lobby.network), 2);
    assert_eq!(lobby.live_guest_transports(), 1);
}

#[tokio::test]
async fn test_path_blip_keeps_the_link() {
    // Retry slow enough that only the recovery can bring the link back
    let lobby = Lobby::open_with(harness::test_config().with_reconnect(1_000, 4_000)).await;
    let guest = lobby.connected_guest("u1").await;
    let first = guest.client().expect("client").connection_id();
    let transport = lobby.network.latest(Role::Guest).expect("guest transport");

    transport.emit(TransportEvent::StateChanged(ConnectionState::Disconnected));
    let status = wait_status(&guest, "path lost", |s| {
        s.state == ConnectionState::Disconnected && s.retry_pending
    })
    .await;
    assert!(status.channel_ready);
    assert!(guest.client().is_none());

    transport.emit(TransportEvent::StateChanged(ConnectionState::Connected));
    let status = wait_status(&guest, "path recovered", |s| {
        is_up(s) && !s.retry_pending
    })
    .await;
    assert_eq!(status.attempts, 0);

    let client = guest.require_client().expect("client");
    assert_eq!(client.connection_id(), first);
    assert_eq!(client.list_songs().await.expect("songs.list").len(), 2);
    assert_eq!(offers(&lobby.network), 1);

    // The heartbeat is back too: a silent link gets caught
    lobby.network.drop_messages(true);
    wait_status(&guest, "heartbeat failure", |s| s.last_error.is_some()).await;
}

#[tokio::test]
async fn test_channel_close_on_connected_transport_reconnects() {
    let lobby = Lobby::open().await;
    let guest = lobby.connected_guest("u1").await;
    let transport = lobby.network.latest(Role::Guest).expect("guest transport");

    transport.emit(TransportEvent::ChannelClosed);

    let status = wait_status(&guest, "channel loss handled", |s| {
        s.retry_pending
            && s.last_error
                .as_deref()
                .is_some_and(|e| e.contains("data channel closed"))
    })
    .await;
    assert_eq!(status.state, ConnectionState::Failed);
    assert!(!status.channel_ready);
    assert!(guest.client().is_none());
    assert!(transport.is_closed());

    wait_status(&guest, "link back up", is_up).await;
    assert_eq!(offers(&lobby.network), 2);
    assert_eq!(lobby.live_guest_transports(), 1);
}

#[tokio::test]
async fn test_connection_timeout_fails_attempt() {
    let lobby = Lobby::open().await;
    lobby.network.stall_connections(true);

    let guest = lobby.guest("u1");
    guest.start_connection("u1");

    let status = wait_status(&guest, "connection timeout", |s| {
        s.last_error
            .as_deref()
            .is_some_and(|e| e.contains("connection timeout"))
    })
    .await;
    assert_eq!(status.state, ConnectionState::Failed);
    assert!(status.retry_pending);

    lobby.network.stall_connections(false);
    wait_status(&guest, "link up", is_up).await;
}

#[tokio::test]
async fn test_signaling_fault_fails_attempt() {
    let lobby = Lobby::open().await;
    let guest = lobby.connected_guest("u1").await;

    lobby
        .relay
        .inject_fault(&MemoryRelay::guest_channel(LOBBY, "u1"), "relay restarted");

    wait_status(&guest, "signaling failure", |s| {
        s.last_error
            .as_deref()
            .is_some_and(|e| e.contains("relay restarted"))
    })
    .await;
    wait_status(&guest, "link back up", is_up).await;
    assert_eq!(offers(&lobby.network), 2);
}

#[tokio::test]
async fn test_shutdown_ends_actor() {
    let lobby = Lobby::open().await;
    let guest = lobby.connected_guest("u1").await;

    guest.shutdown().await;

    let guest = &guest;
    harness::eventually("actor exit", move || async move { guest.is_finished() }).await;
    assert_eq!(lobby.live_guest_transports(), 0);
}
