//! Peer link test harness
//!
//! Wires a [`HostFanout`] and any number of guest supervisors together over
//! a [`MemoryRelay`] and a [`MockNetwork`], with timings short enough for
//! reconnection and heartbeat tests to run in well under a second each.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{sleep, timeout, Instant};
use tuneperfect_webrtc::config::PeerLinkConfig;
use tuneperfect_webrtc::host::{HostEvent, HostFanout, SongCatalog};
use tuneperfect_webrtc::peer::{ConnectionState, PeerConnection, PeerEvent, Role};
use tuneperfect_webrtc::signaling::{GuestSignaling, MemoryRelay, SignalMessage};
use tuneperfect_webrtc::supervisor::{ConnectionSupervisor, SupervisorStatus};
use tuneperfect_webrtc::testing::MockNetwork;
use tuneperfect_webrtc::SongSummary;

pub const LOBBY: &str = "lobby-1";
pub const HOST_ID: &str = "host-1";

/// Upper bound for anything a test waits on
pub const WAIT: Duration = Duration::from_secs(3);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Millisecond timings for tests
pub fn test_config() -> PeerLinkConfig {
    PeerLinkConfig::lan()
        .with_heartbeat(200, 100)
        .with_reconnect(100, 800)
        .with_attempts_before_toast(2)
        .with_connection_timeout(400)
        .with_rpc_timeout(500)
}

pub fn song(hash: &str, title: &str, artist: &str) -> SongSummary {
    SongSummary {
        hash: hash.to_string(),
        title: title.to_string(),
        artist: artist.to_string(),
    }
}

pub fn default_songs() -> Vec<SongSummary> {
    vec![
        song("a1f3", "Bohemian Rhapsody", "Queen"),
        song("b27c", "Africa", "Toto"),
    ]
}

/// A running host with its relay and transport network
pub struct Lobby {
    pub config: PeerLinkConfig,
    pub relay: MemoryRelay,
    pub network: MockNetwork,
    pub catalog: Arc<SongCatalog>,
    pub host: HostFanout,
}

impl Lobby {
    pub async fn open() -> Self {
        Self::open_with(test_config()).await
    }

    pub async fn open_with(config: PeerLinkConfig) -> Self {
        init_tracing();

        let relay = MemoryRelay::new();
        let network = MockNetwork::new();
        let catalog = Arc::new(SongCatalog::new(default_songs()));

        let host = HostFanout::spawn(
            config.clone(),
            Arc::new(relay.host(LOBBY)),
            network.factory(),
            catalog.clone(),
            HOST_ID,
        )
        .expect("Failed to spawn host");
        host.start().await.expect("Failed to start host");

        Self {
            config,
            relay,
            network,
            catalog,
            host,
        }
    }

    /// A supervisor for `user` that has not been started
    pub fn guest(&self, user: &str) -> ConnectionSupervisor {
        ConnectionSupervisor::spawn(
            self.config.clone(),
            Arc::new(self.relay.guest(LOBBY, user)),
            self.network.factory(),
        )
        .expect("Failed to spawn supervisor")
    }

    /// A supervisor for `user` with an open data channel
    pub async fn connected_guest(&self, user: &str) -> ConnectionSupervisor {
        let guest = self.guest(user);
        guest.start_connection(user);
        wait_status(&guest, "channel ready", |s| s.channel_ready).await;
        guest
    }

    /// Send an offer for `user` by hand and never answer it
    ///
    /// Leaves a host-side connection whose channel never opens.
    pub async fn dangling_offer(&self, user: &str) -> PeerConnection {
        let (events, _rx) = tokio::sync::mpsc::unbounded_channel::<PeerEvent>();
        let peer = PeerConnection::new(
            Role::Guest,
            HOST_ID.to_string(),
            &self.config.channels,
            self.network.factory().as_ref(),
            events,
        )
        .await
        .expect("Failed to create guest connection");

        let offer = peer.create_offer().await.expect("Failed to create offer");
        self.relay
            .guest(LOBBY, user)
            .send_signal(SignalMessage::offer(offer, user))
            .await
            .expect("Failed to send offer");
        peer
    }

    /// Messages the host sent to `user`
    pub fn sent_to(&self, user: &str) -> Vec<SignalMessage> {
        self.relay
            .published_to(&MemoryRelay::guest_channel(LOBBY, user))
    }

    /// Messages guests sent to the host
    pub fn sent_to_host(&self) -> Vec<SignalMessage> {
        self.relay.published_to(&MemoryRelay::host_channel(LOBBY))
    }

    pub fn live_guest_transports(&self) -> usize {
        self.network.live_transports(Some(Role::Guest)).len()
    }
}

/// Wait until the supervisor status satisfies `predicate`
pub async fn wait_status<F>(
    supervisor: &ConnectionSupervisor,
    what: &str,
    predicate: F,
) -> SupervisorStatus
where
    F: FnMut(&SupervisorStatus) -> bool,
{
    let mut status = supervisor.status();
    let result = timeout(WAIT, status.wait_for(predicate))
        .await
        .unwrap_or_else(|_| {
            panic!(
                "Timed out waiting for {}: {:?}",
                what,
                supervisor.status().borrow().clone()
            )
        });
    let snapshot = result.expect("Supervisor stopped").clone();
    snapshot
}

/// Poll `check` until it holds
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + WAIT;
    while !check().await {
        if Instant::now() >= deadline {
            panic!("Timed out waiting for {}", what);
        }
        sleep(Duration::from_millis(10)).await;
    }
}

/// Next host event that matches `predicate`, skipping the rest
pub async fn next_host_event<F>(
    events: &mut broadcast::Receiver<HostEvent>,
    mut predicate: F,
) -> HostEvent
where
    F: FnMut(&HostEvent) -> bool,
{
    timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("Host event stream closed"),
            }
        }
    })
    .await
    .expect("Timed out waiting for host event")
}

/// Whether the status describes a fully working link
pub fn is_up(status: &SupervisorStatus) -> bool {
    status.state == ConnectionState::Connected && status.channel_ready
}
