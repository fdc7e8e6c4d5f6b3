//! Transport primitive consumed by [`PeerConnection`](super::PeerConnection)
//!
//! The negotiation itself (ICE, DTLS, SCTP) is delegated to an
//! [`RtcTransport`]. Everything the transport reports flows through one
//! [`EventSink`] per connection, tagged with that connection's id so the
//! owner can ignore events from instances it already tore down.

use crate::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

/// Unique id of one connection instance
pub type ConnectionId = uuid::Uuid;

/// Which side of the link a connection plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Creates the data channel and the offer
    Guest,
    /// Answers offers; receives the data channel
    Host,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Guest => "guest",
            Role::Host => "host",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection state as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Created, nothing negotiated yet
    New,
    /// Negotiation in progress
    Connecting,
    /// Direct path established
    Connected,
    /// Path lost, may come back on its own
    Disconnected,
    /// Negotiation or path failed
    Failed,
    /// Closed locally or remotely
    Closed,
}

impl ConnectionState {
    /// States the reconnection rule reacts to
    pub fn is_retry_trigger(&self) -> bool {
        matches!(
            self,
            ConnectionState::Disconnected | ConnectionState::Failed | ConnectionState::Closed
        )
    }

    /// States the transport never leaves
    ///
    /// `Disconnected` is not one of them; the path may recover.
    pub fn is_final(&self) -> bool {
        matches!(self, ConnectionState::Failed | ConnectionState::Closed)
    }
}

/// Kind of a session description handed to the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

/// Something the transport observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Connection state transition
    StateChanged(ConnectionState),
    /// A local path candidate to forward over signaling
    CandidateDiscovered(String),
    /// The application data channel is open
    ChannelOpen,
    /// The application data channel closed
    ChannelClosed,
    /// A text payload arrived on the data channel
    MessageReceived(String),
}

/// A transport event tagged with the connection it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEvent {
    pub connection_id: ConnectionId,
    pub event: TransportEvent,
}

/// Connection status readable without going through the owner's event loop
#[derive(Debug)]
pub struct LinkStatus {
    state: RwLock<ConnectionState>,
    channel_open: AtomicBool,
    closed: AtomicBool,
}

impl LinkStatus {
    fn new() -> Self {
        Self {
            state: RwLock::new(ConnectionState::New),
            channel_open: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn is_channel_open(&self) -> bool {
        self.channel_open.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Mark closed; returns false if it already was
    pub(crate) fn mark_closed(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.channel_open.store(false, Ordering::SeqCst);
        *self.state.write() = ConnectionState::Closed;
        true
    }
}

/// Typed event sink handed to the transport at creation
///
/// Updates the shared [`LinkStatus`] before forwarding, and goes silent once
/// the connection is closed.
#[derive(Debug, Clone)]
pub struct EventSink {
    connection_id: ConnectionId,
    tx: mpsc::UnboundedSender<PeerEvent>,
    status: Arc<LinkStatus>,
}

impl EventSink {
    /// Create a sink for a new connection
    pub fn new(connection_id: ConnectionId, tx: mpsc::UnboundedSender<PeerEvent>) -> Self {
        Self {
            connection_id,
            tx,
            status: Arc::new(LinkStatus::new()),
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn status(&self) -> Arc<LinkStatus> {
        Arc::clone(&self.status)
    }

    /// Record and forward an event
    pub fn emit(&self, event: TransportEvent) {
        if self.status.is_closed() {
            trace!("Dropping {:?} from closed connection {}", event, self.connection_id);
            return;
        }

        match &event {
            TransportEvent::StateChanged(state) => {
                *self.status.state.write() = *state;
                if state.is_final() {
                    self.status.channel_open.store(false, Ordering::SeqCst);
                }
            }
            TransportEvent::ChannelOpen => self.status.channel_open.store(true, Ordering::SeqCst),
            TransportEvent::ChannelClosed => {
                self.status.channel_open.store(false, Ordering::SeqCst)
            }
            TransportEvent::CandidateDiscovered(_) | TransportEvent::MessageReceived(_) => {}
        }

        // The owner may already be gone
        let _ = self.tx.send(PeerEvent {
            connection_id: self.connection_id,
            event,
        });
    }

    pub fn state_changed(&self, state: ConnectionState) {
        self.emit(TransportEvent::StateChanged(state));
    }

    pub fn candidate(&self, candidate: String) {
        self.emit(TransportEvent::CandidateDiscovered(candidate));
    }

    pub fn channel_open(&self) {
        self.emit(TransportEvent::ChannelOpen);
    }

    pub fn channel_closed(&self) {
        self.emit(TransportEvent::ChannelClosed);
    }

    pub fn message(&self, text: String) {
        self.emit(TransportEvent::MessageReceived(text));
    }
}

/// Direct transport between two peers
#[async_trait]
pub trait RtcTransport: Send + Sync {
    /// Create the application data channel (guest side)
    async fn create_data_channel(&self, label: &str, ordered: bool) -> Result<()>;

    /// Create and apply the local offer, returning its SDP
    async fn create_offer(&self) -> Result<String>;

    /// Create and apply the local answer, returning its SDP
    ///
    /// The remote offer must already be applied.
    async fn create_answer(&self) -> Result<String>;

    /// Apply a remote description
    async fn set_remote_description(&self, kind: SdpKind, sdp: &str) -> Result<()>;

    /// Apply a remote path candidate
    async fn add_ice_candidate(&self, candidate: &str) -> Result<()>;

    /// Send a text payload on the data channel
    async fn send(&self, text: &str) -> Result<()>;

    /// Tear the transport down
    async fn close(&self) -> Result<()>;
}

/// Creates transports; one per connection attempt
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(&self, role: Role, sink: EventSink) -> Result<Arc<dyn RtcTransport>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink() -> (EventSink, mpsc::UnboundedReceiver<PeerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventSink::new(uuid::Uuid::new_v4(), tx), rx)
    }

    #[test]
    fn test_sink_tracks_status() {
        let (sink, mut rx) = sink();
        let status = sink.status();

        sink.state_changed(ConnectionState::Connected);
        sink.channel_open();
        assert_eq!(status.state(), ConnectionState::Connected);
        assert!(status.is_channel_open());

        // A path blip leaves the data channel alone
        sink.state_changed(ConnectionState::Disconnected);
        assert!(status.is_channel_open());

        sink.state_changed(ConnectionState::Failed);
        assert!(!status.is_channel_open());

        let first = rx.try_recv().unwrap();
        assert_eq!(first.connection_id, sink.connection_id());
        assert_eq!(
            first.event,
            TransportEvent::StateChanged(ConnectionState::Connected)
        );
    }

    #[test]
    fn test_sink_silent_after_close() {
        let (sink, mut rx) = sink();
        let status = sink.status();

        assert!(status.mark_closed());
        assert!(!status.mark_closed());

        sink.state_changed(ConnectionState::Failed);
        assert_eq!(status.state(), ConnectionState::Closed);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_state_classification() {
        assert!(ConnectionState::Failed.is_retry_trigger());
        assert!(ConnectionState::Disconnected.is_retry_trigger());
        assert!(ConnectionState::Closed.is_retry_trigger());
        assert!(!ConnectionState::Connecting.is_retry_trigger());

        assert!(ConnectionState::Failed.is_final());
        assert!(ConnectionState::Closed.is_final());
        assert!(!ConnectionState::Disconnected.is_final());
        assert_eq!(Role::Host.to_string(), "host");
    }
}
