//! Guest/host peer link for TunePerfect companion apps
//!
//! Connects companion clients ("guests") to the game ("host") over a direct
//! WebRTC data channel, using an external relay only to exchange connection
//! metadata. The crate owns the connection lifecycle on both sides.
//!
//! # Features
//!
//! - **Offer/answer over signaling**: guest offers, host answers, path
//!   candidates trickle both ways and are buffered until they can be applied
//! - **Liveness detection**: a fail-fast heartbeat over the data channel
//!   catches connections that report healthy but are dead
//! - **Supervised reconnection**: exponential backoff, a one-time trouble
//!   notice, and no retry after an authoritative goodbye
//! - **Host fanout**: one connection per guest, song list pushes and
//!   request routing
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────┐      signaling relay       ┌──────────────────────────┐
//! │  ConnectionSupervisor    │  offer / candidates ──────▶│  HostFanout              │
//! │  ├─ PeerConnection(Guest)│◀────── answer / candidates │  ├─ GuestRegistry        │
//! │  ├─ Heartbeat            │                            │  │   └─ PeerConnection   │
//! │  ├─ ReconnectPolicy      │      data channel          │  │       (Host) per guest│
//! │  └─ RpcClient            │◀══════════════════════════▶│  └─ GameRouter           │
//! └──────────────────────────┘   requests / pushes        └──────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use tuneperfect_webrtc::PeerLinkConfig;
//!
//! let config = PeerLinkConfig::default()
//!     .with_heartbeat(10_000, 4_000)
//!     .with_reconnect(1_000, 30_000);
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.channels.label, "game-rpc");
//! ```

#![warn(clippy::all)]

pub mod channels;
pub mod config;
pub mod error;
pub mod host;
pub mod peer;
pub mod signaling;
pub mod supervisor;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use channels::{ChannelMessage, PushMessage, RpcCall, RpcClient, RpcReply, SongSummary};
pub use config::PeerLinkConfig;
pub use error::{Error, Result};
pub use host::{GameRouter, GuestInfo, HostEvent, HostFanout, SongCatalog};
pub use peer::{ConnectionState, PeerConnection, Role};
pub use signaling::{GoodbyeReason, GuestSignaling, HostSignaling, MemoryRelay, SignalMessage};
pub use supervisor::{ConnectionSupervisor, SupervisorNotice, SupervisorStatus};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
