//! Host side: one connection per guest
//!
//! [`HostFanout`] listens on the lobby's host channel, answers every guest
//! offer with a fresh host-role connection, and routes the rest of each
//! guest's signaling to that connection. The host never reconnects on its
//! own; a guest that drops is removed and has to offer again.

mod actor;
pub mod registry;
pub mod router;

pub use registry::{GuestInfo, GuestRegistry};
pub use router::{dispatch, GameRouter, SongCatalog};

use crate::channels::ChannelMessage;
use crate::config::PeerLinkConfig;
use crate::peer::{ConnectionState, TransportFactory};
use crate::signaling::{GoodbyeReason, HostSignaling};
use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Why a guest left the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaveReason {
    /// The guest said goodbye
    Goodbye(GoodbyeReason),
    /// The transport reported a terminal state
    ConnectionLost(ConnectionState),
    /// Negotiation with the guest failed
    NegotiationFailed(String),
    /// Removed by the host
    Closed,
}

/// Registry changes, for the host user interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// A guest offered and was answered
    GuestJoined { guest_id: String },
    /// The guest's data channel opened
    GuestReady { guest_id: String },
    /// The guest was removed
    GuestLeft {
        guest_id: String,
        reason: LeaveReason,
    },
}

pub(crate) enum HostCommand {
    Start {
        done: oneshot::Sender<Result<()>>,
    },
    Stop {
        done: oneshot::Sender<()>,
    },
    CloseGuest {
        guest_id: String,
        done: oneshot::Sender<Result<()>>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// Handle to the host fanout actor
pub struct HostFanout {
    host_id: String,
    commands: mpsc::UnboundedSender<HostCommand>,
    registry: GuestRegistry,
    router: Arc<dyn GameRouter>,
    events: broadcast::Sender<HostEvent>,
    task: JoinHandle<()>,
}

impl HostFanout {
    /// Validate `config` and start the actor
    ///
    /// Nothing is received until [`start`](Self::start) is called.
    pub fn spawn(
        config: PeerLinkConfig,
        signaling: Arc<dyn HostSignaling>,
        factory: Arc<dyn TransportFactory>,
        router: Arc<dyn GameRouter>,
        host_id: impl Into<String>,
    ) -> Result<Self> {
        config.validate()?;

        let host_id = host_id.into();
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(64);
        let registry = GuestRegistry::new();

        let actor = actor::FanoutActor::new(
            config,
            host_id.clone(),
            signaling,
            factory,
            Arc::clone(&router),
            registry.clone(),
            command_rx,
            events.clone(),
        );
        let task = tokio::spawn(actor.run());

        info!("Host fanout {} started", host_id);
        Ok(Self {
            host_id,
            commands,
            registry,
            router,
            events,
            task,
        })
    }

    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    /// Subscribe to the host signaling channel; no-op if already listening
    pub async fn start(&self) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.send(HostCommand::Start { done })?;
        rx.await
            .map_err(|_| Error::InternalError("host actor stopped".to_string()))?
    }

    /// Stop listening, say goodbye to every guest and close their connections
    pub async fn stop(&self) {
        let (done, rx) = oneshot::channel();
        if self.send(HostCommand::Stop { done }).is_ok() {
            let _ = rx.await;
        }
    }

    /// Drop one guest (it left the lobby)
    pub async fn close_guest(&self, guest_id: &str) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.send(HostCommand::CloseGuest {
            guest_id: guest_id.to_string(),
            done,
        })?;
        rx.await
            .map_err(|_| Error::InternalError("host actor stopped".to_string()))?
    }

    /// Stop and end the actor
    pub async fn shutdown(&self) {
        let (done, rx) = oneshot::channel();
        if self.send(HostCommand::Shutdown { done }).is_ok() {
            let _ = rx.await;
        }
    }

    /// Send to one guest
    ///
    /// Returns `Ok(false)` if the guest's channel is not open.
    pub async fn send_to(&self, guest_id: &str, message: &ChannelMessage) -> Result<bool> {
        let peer = self.registry.get(guest_id).await?;
        Ok(peer.send(message).await)
    }

    /// Send to every guest with an open channel, returning how many got it
    pub async fn broadcast(&self, message: &ChannelMessage) -> usize {
        let mut delivered = 0;
        for (guest_id, peer) in self.registry.peers().await {
            if !peer.is_channel_open() {
                debug!("Skipping guest {}: channel not open", guest_id);
                continue;
            }
            if peer.send(message).await {
                delivered += 1;
            } else {
                warn!("Broadcast to guest {} failed", guest_id);
            }
        }
        delivered
    }

    /// Push the current song list to every ready guest
    pub async fn broadcast_songs(&self) -> Result<usize> {
        let songs = self.router.list_songs().await?;
        Ok(self.broadcast(&ChannelMessage::songs_push(songs)).await)
    }

    /// Snapshot of every registered guest
    pub async fn guests(&self) -> Vec<GuestInfo> {
        self.registry.list().await
    }

    pub async fn guest_count(&self) -> usize {
        self.registry.count().await
    }

    /// Subscribe to registry changes
    pub fn subscribe_events(&self) -> broadcast::Receiver<HostEvent> {
        self.events.subscribe()
    }

    /// Whether the actor has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    fn send(&self, command: HostCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Error::InternalError("host actor stopped".to_string()))
    }
}

impl std::fmt::Debug for HostFanout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostFanout")
            .field("host_id", &self.host_id)
            .finish()
    }
}
