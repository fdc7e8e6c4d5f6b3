//! Companion loopback
//!
//! Runs a host and a guest in one process, joined by an in-memory signaling
//! relay and real WebRTC transports. The guest connects, lists the host's
//! songs over the data channel and leaves. Useful for checking that ICE and
//! data channels work on a given machine and STUN setup.

use anyhow::{bail, Context};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use tuneperfect_webrtc::config::PeerLinkConfig;
use tuneperfect_webrtc::host::{HostEvent, HostFanout, SongCatalog};
use tuneperfect_webrtc::peer::WebRtcTransportFactory;
use tuneperfect_webrtc::signaling::MemoryRelay;
use tuneperfect_webrtc::supervisor::ConnectionSupervisor;
use tuneperfect_webrtc::SongSummary;

/// Connect a guest to a host in-process and list songs
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// STUN server URLs (comma-separated)
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "stun:stun.l.google.com:19302",
        env = "TUNEPERFECT_STUN_SERVERS"
    )]
    stun_servers: Vec<String>,

    /// Configuration preset
    #[arg(long, value_enum, default_value = "default", env = "TUNEPERFECT_PRESET")]
    preset: ConfigPreset,

    /// Lobby to join
    #[arg(long, default_value = "loopback", env = "TUNEPERFECT_LOBBY_ID")]
    lobby_id: String,

    /// Guest identity
    #[arg(long, default_value = "companion-1", env = "TUNEPERFECT_USER_ID")]
    user_id: String,

    /// Seconds to wait for the data channel
    #[arg(long, default_value_t = 20, env = "TUNEPERFECT_TIMEOUT_SECS")]
    timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum ConfigPreset {
    /// Library defaults
    Default,
    /// Same local network
    Lan,
    /// Cellular companions
    Mobile,
}

fn build_config(args: &Args) -> anyhow::Result<PeerLinkConfig> {
    let config = match args.preset {
        ConfigPreset::Default => PeerLinkConfig::default(),
        ConfigPreset::Lan => {
            info!("Using lan preset");
            PeerLinkConfig::lan()
        }
        ConfigPreset::Mobile => {
            info!("Using mobile_network preset");
            PeerLinkConfig::mobile_network()
        }
    }
    .with_stun_servers(args.stun_servers.clone());

    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn demo_songs() -> Vec<SongSummary> {
    [
        ("a1f3", "Bohemian Rhapsody", "Queen"),
        ("b27c", "Africa", "Toto"),
        ("c90e", "Take On Me", "a-ha"),
    ]
    .into_iter()
    .map(|(hash, title, artist)| SongSummary {
        hash: hash.to_string(),
        title: title.to_string(),
        artist: artist.to_string(),
    })
    .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();
    let config = build_config(&args)?;

    info!("Stun servers: {:?}", config.stun_servers);
    info!("Lobby: {}, guest: {}", args.lobby_id, args.user_id);

    let relay = MemoryRelay::new();
    let factory = Arc::new(WebRtcTransportFactory::new(&config));

    let host = HostFanout::spawn(
        config.clone(),
        Arc::new(relay.host(args.lobby_id.clone())),
        factory.clone(),
        Arc::new(SongCatalog::new(demo_songs())),
        "host",
    )?;
    host.start().await?;

    let mut host_events = host.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = host_events.recv().await {
            match event {
                HostEvent::GuestJoined { guest_id } => info!("Host: {} joined", guest_id),
                HostEvent::GuestReady { guest_id } => info!("Host: {} ready", guest_id),
                HostEvent::GuestLeft { guest_id, reason } => {
                    info!("Host: {} left ({:?})", guest_id, reason)
                }
            }
        }
    });

    let guest = ConnectionSupervisor::spawn(
        config,
        Arc::new(relay.guest(args.lobby_id.clone(), args.user_id.clone())),
        factory,
    )?;
    guest.start_connection(args.user_id.clone());

    let mut status = guest.status();
    let ready = tokio::time::timeout(
        Duration::from_secs(args.timeout_secs),
        status.wait_for(|s| s.channel_ready),
    )
    .await;

    let outcome = match ready {
        Ok(Ok(_)) => list_songs(&guest).await,
        Ok(Err(_)) => Err(anyhow::anyhow!("supervisor stopped before connecting")),
        Err(_) => {
            let last_error = guest.status().borrow().last_error.clone();
            Err(anyhow::anyhow!(
                "data channel not ready after {}s (last error: {})",
                args.timeout_secs,
                last_error.as_deref().unwrap_or("none")
            ))
        }
    };

    guest.shutdown().await;
    host.shutdown().await;

    if let Err(e) = &outcome {
        warn!("Loopback failed: {}", e);
    }
    outcome
}

async fn list_songs(guest: &ConnectionSupervisor) -> anyhow::Result<()> {
    let client = guest.require_client()?;

    let pong = client.ping().await.context("ping failed")?;
    info!("Host clock: {}", pong.timestamp);

    let songs = client.list_songs().await.context("songs.list failed")?;
    if songs.is_empty() {
        bail!("host returned no songs");
    }

    println!("{} songs:", songs.len());
    for song in &songs {
        println!("  {} - {} [{}]", song.artist, song.title, song.hash);
    }
    Ok(())
}

fn init_tracing() {
    // Initialize tracing with EnvFilter for RUST_LOG support
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
