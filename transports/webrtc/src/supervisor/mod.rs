//! Guest connection lifecycle with supervised reconnection
//!
//! [`ConnectionSupervisor`] is a handle to a single actor task that owns the
//! guest's current [`PeerConnection`](crate::peer::PeerConnection), its
//! signaling subscription, the heartbeat and the retry timer. Every input
//! (commands, transport events, signaling messages, timers) is processed in
//! that task, one at a time.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tuneperfect_webrtc::config::PeerLinkConfig;
//! use tuneperfect_webrtc::peer::WebRtcTransportFactory;
//! use tuneperfect_webrtc::signaling::MemoryRelay;
//! use tuneperfect_webrtc::supervisor::ConnectionSupervisor;
//!
//! # async fn example() -> tuneperfect_webrtc::Result<()> {
//! let config = PeerLinkConfig::default();
//! let relay = MemoryRelay::new();
//! let supervisor = ConnectionSupervisor::spawn(
//!     config.clone(),
//!     Arc::new(relay.guest("lobby-1", "u1")),
//!     Arc::new(WebRtcTransportFactory::new(&config)),
//! )?;
//!
//! supervisor.start_connection("u1");
//! let mut status = supervisor.status();
//! status.wait_for(|s| s.channel_ready).await.ok();
//!
//! if let Some(client) = supervisor.client() {
//!     let songs = client.list_songs().await?;
//!     println!("{} songs", songs.len());
//! }
//! supervisor.stop_connection().await;
//! # Ok(())
//! # }
//! ```

mod actor;

use crate::channels::{PushMessage, RpcClient};
use crate::config::PeerLinkConfig;
use crate::peer::{ConnectionState, TransportFactory};
use crate::signaling::GuestSignaling;
use crate::{Error, Result};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Observable state of the guest lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorStatus {
    /// Connection state of the current attempt
    pub state: ConnectionState,
    /// The data channel is open
    pub channel_ready: bool,
    /// An attempt is in flight
    pub connecting: bool,
    /// Retries since the last successful connection
    pub attempts: u32,
    /// A retry timer is armed
    pub retry_pending: bool,
    /// Error that failed the most recent attempt
    pub last_error: Option<String>,
    /// Identity the lifecycle is kept alive for
    pub active_user: Option<String>,
}

impl Default for SupervisorStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::New,
            channel_ready: false,
            connecting: false,
            attempts: 0,
            retry_pending: false,
            last_error: None,
            active_user: None,
        }
    }
}

/// Out-of-band notifications for the user interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorNotice {
    /// Reconnection keeps failing; emitted once per failure streak
    ConnectionTrouble {
        /// Failed retries so far
        attempts: u32,
    },
}

pub(crate) enum Command {
    Start {
        user: String,
    },
    Connect {
        user: String,
        done: oneshot::Sender<()>,
    },
    Disconnect {
        done: oneshot::Sender<()>,
    },
    Stop {
        done: oneshot::Sender<()>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// Handle to the guest lifecycle actor
///
/// Dropping the last handle tears the current attempt down and ends the
/// actor.
pub struct ConnectionSupervisor {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<SupervisorStatus>,
    notices: broadcast::Sender<SupervisorNotice>,
    pushes: broadcast::Sender<PushMessage>,
    client: Arc<RwLock<Option<Arc<RpcClient>>>>,
    task: JoinHandle<()>,
}

impl ConnectionSupervisor {
    /// Validate `config` and start the actor
    pub fn spawn(
        config: PeerLinkConfig,
        signaling: Arc<dyn GuestSignaling>,
        factory: Arc<dyn TransportFactory>,
    ) -> Result<Self> {
        config.validate()?;

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(SupervisorStatus::default());
        let (notices, _) = broadcast::channel(16);
        let (pushes, _) = broadcast::channel(64);
        let client = Arc::new(RwLock::new(None));

        let actor = actor::SupervisorActor::new(
            config,
            signaling,
            factory,
            command_rx,
            status_tx,
            notices.clone(),
            pushes.clone(),
            Arc::clone(&client),
        );
        let task = tokio::spawn(actor.run());

        info!("Connection supervisor started");
        Ok(Self {
            commands,
            status,
            notices,
            pushes,
            client,
            task,
        })
    }

    /// Begin a lifecycle for `user`: reset backoff, cancel any pending
    /// retry, and connect
    pub fn start_connection(&self, user: impl Into<String>) {
        self.send(Command::Start { user: user.into() });
    }

    /// Run one connection attempt for `user`
    ///
    /// Returns once the offer went out or the attempt failed. Does nothing if
    /// an attempt is already in flight or the link is up. Unlike
    /// [`start_connection`](Self::start_connection) this does not make
    /// `user` the active identity, so a failure is not retried.
    pub async fn connect(&self, user: impl Into<String>) {
        let (done, rx) = oneshot::channel();
        self.send(Command::Connect {
            user: user.into(),
            done,
        });
        let _ = rx.await;
    }

    /// Tear the current attempt down and cancel any pending retry
    ///
    /// The state returns to `New`; calling it again changes nothing.
    pub async fn disconnect(&self) {
        let (done, rx) = oneshot::channel();
        self.send(Command::Disconnect { done });
        let _ = rx.await;
    }

    /// End the lifecycle: say goodbye if connected, forget the identity and
    /// disconnect
    pub async fn stop_connection(&self) {
        let (done, rx) = oneshot::channel();
        self.send(Command::Stop { done });
        let _ = rx.await;
    }

    /// Stop the lifecycle and end the actor
    pub async fn shutdown(&self) {
        let (done, rx) = oneshot::channel();
        self.send(Command::Shutdown { done });
        let _ = rx.await;
    }

    /// Watch the lifecycle status
    pub fn status(&self) -> watch::Receiver<SupervisorStatus> {
        self.status.clone()
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    /// Subscribe to user-facing notices
    pub fn notices(&self) -> broadcast::Receiver<SupervisorNotice> {
        self.notices.subscribe()
    }

    /// Subscribe to messages the host pushes over the data channel
    pub fn subscribe_pushes(&self) -> broadcast::Receiver<PushMessage> {
        self.pushes.subscribe()
    }

    /// Client for the host's procedures while the data channel is open
    pub fn client(&self) -> Option<Arc<RpcClient>> {
        self.client.read().clone()
    }

    /// Like [`client`](Self::client), but an error when the channel is not open
    pub fn require_client(&self) -> Result<Arc<RpcClient>> {
        self.client()
            .ok_or_else(|| Error::ConnectionClosed("no open data channel".to_string()))
    }

    /// Whether the actor has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("Supervisor actor already stopped");
        }
    }
}

impl std::fmt::Debug for ConnectionSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSupervisor")
            .field("status", &*self.status.borrow())
            .finish()
    }
}
