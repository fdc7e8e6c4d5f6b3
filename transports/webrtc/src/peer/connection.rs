//! Role-parameterised peer connection
//!
//! One state machine for both sides of the link. The guest creates the data
//! channel and the offer, then applies the host's answer. The host applies
//! the offer and answers; it receives the data channel from the transport.
//! Remote candidates always go through a [`PathCandidateBuffer`].

use super::candidate_buffer::{CandidateDisposition, PathCandidateBuffer};
use super::transport::{
    ConnectionId, ConnectionState, LinkStatus, PeerEvent, Role, RtcTransport, SdpKind,
    TransportFactory,
};
use crate::channels::{ChannelMessage, MAX_MESSAGE_SIZE};
use crate::config::ChannelConfig;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

/// A single connection attempt to one remote peer
///
/// Never reused: a new attempt builds a new instance with a new id.
pub struct PeerConnection {
    role: Role,
    connection_id: ConnectionId,
    remote_id: String,
    channel: ChannelConfig,
    transport: Arc<dyn RtcTransport>,
    status: Arc<LinkStatus>,
    candidates: Mutex<PathCandidateBuffer>,
    remote_description_applied: AtomicBool,
}

impl PeerConnection {
    /// Create a connection and its transport
    ///
    /// Every transport event is sent to `events`, tagged with the new
    /// connection id.
    #[instrument(skip(channel, factory, events), fields(role = %role))]
    pub async fn new(
        role: Role,
        remote_id: String,
        channel: &ChannelConfig,
        factory: &dyn TransportFactory,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Self> {
        let connection_id = uuid::Uuid::new_v4();
        let sink = super::transport::EventSink::new(connection_id, events);
        let status = sink.status();
        let transport = factory.create(role, sink).await?;

        info!(
            "Created {} peer connection {} for {}",
            role, connection_id, remote_id
        );

        Ok(Self {
            role,
            connection_id,
            remote_id,
            channel: channel.clone(),
            transport,
            status,
            candidates: Mutex::new(PathCandidateBuffer::new()),
            remote_description_applied: AtomicBool::new(false),
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Identity of the other side
    pub fn remote_id(&self) -> &str {
        &self.remote_id
    }

    pub fn state(&self) -> ConnectionState {
        self.status.state()
    }

    pub fn is_channel_open(&self) -> bool {
        !self.status.is_closed() && self.status.is_channel_open()
    }

    pub fn is_closed(&self) -> bool {
        self.status.is_closed()
    }

    /// Remote candidates waiting for the remote description
    pub fn buffered_candidates(&self) -> usize {
        self.candidates.lock().buffered_count()
    }

    fn require(&self, role: Role, operation: &'static str) -> Result<()> {
        if self.role != role {
            return Err(Error::RoleMismatch {
                role: self.role.as_str(),
                operation,
            });
        }
        if self.status.is_closed() {
            return Err(Error::ConnectionClosed(format!(
                "{} on closed connection {}",
                operation, self.connection_id
            )));
        }
        Ok(())
    }

    /// Create the data channel and the local offer (guest)
    pub async fn create_offer(&self) -> Result<String> {
        self.require(Role::Guest, "create_offer")?;

        self.transport
            .create_data_channel(&self.channel.label, self.channel.ordered)
            .await?;
        let sdp = self.transport.create_offer().await?;

        debug!("Created offer on {}", self.connection_id);
        Ok(sdp)
    }

    /// Apply a remote offer and produce the answer (host)
    ///
    /// Candidates that arrived before the offer are applied right after it.
    pub async fn create_answer(&self, offer_sdp: &str) -> Result<String> {
        self.require(Role::Host, "create_answer")?;

        self.transport
            .set_remote_description(SdpKind::Offer, offer_sdp)
            .await?;
        self.remote_description_applied.store(true, Ordering::SeqCst);
        self.flush_candidates().await;

        let sdp = self.transport.create_answer().await?;
        debug!("Created answer on {}", self.connection_id);
        Ok(sdp)
    }

    /// Apply the host's answer (guest)
    ///
    /// A second answer for the same attempt is ignored.
    pub async fn apply_answer(&self, answer_sdp: &str) -> Result<()> {
        self.require(Role::Guest, "apply_answer")?;

        if self.remote_description_applied.load(Ordering::SeqCst) {
            warn!(
                "Ignoring duplicate answer on connection {}",
                self.connection_id
            );
            return Ok(());
        }

        self.transport
            .set_remote_description(SdpKind::Answer, answer_sdp)
            .await?;
        self.remote_description_applied.store(true, Ordering::SeqCst);
        self.flush_candidates().await;

        debug!("Applied answer on {}", self.connection_id);
        Ok(())
    }

    /// Hand a remote candidate to the connection
    ///
    /// Applied now if the remote description is in place, otherwise buffered.
    /// Failures are logged and skipped.
    pub async fn add_remote_candidate(&self, candidate: String) {
        if self.status.is_closed() {
            debug!("Dropping candidate for closed connection {}", self.connection_id);
            return;
        }

        let disposition = self.candidates.lock().add_candidate(candidate);
        if let CandidateDisposition::Immediate(candidate) = disposition {
            self.apply_candidate(&candidate).await;
        }
    }

    async fn flush_candidates(&self) {
        let pending = {
            let mut buffer = self.candidates.lock();
            buffer.set_remote_description_ready();
            buffer.flush_candidates()
        };

        if !pending.is_empty() {
            debug!(
                "Applying {} buffered candidates on {}",
                pending.len(),
                self.connection_id
            );
        }
        for candidate in pending {
            self.apply_candidate(&candidate).await;
        }
    }

    async fn apply_candidate(&self, candidate: &str) {
        if let Err(e) = self.transport.add_ice_candidate(candidate).await {
            warn!(
                "Failed to apply remote candidate on {}: {}",
                self.connection_id, e
            );
        }
    }

    /// Send an application message
    ///
    /// Returns false without sending when the data channel is not open.
    pub async fn send(&self, message: &ChannelMessage) -> bool {
        if !self.is_channel_open() {
            debug!(
                "Data channel on {} not open, dropping message",
                self.connection_id
            );
            return false;
        }

        let text = match message.to_text() {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to encode channel message: {}", e);
                return false;
            }
        };

        if text.len() > MAX_MESSAGE_SIZE {
            warn!(
                "Message size {} exceeds maximum {} bytes, dropping",
                text.len(),
                MAX_MESSAGE_SIZE
            );
            return false;
        }

        match self.transport.send(&text).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Send on {} failed: {}", self.connection_id, e);
                false
            }
        }
    }

    /// Tear down; safe to call any number of times
    pub async fn close(&self) {
        if !self.status.mark_closed() {
            return;
        }

        self.candidates.lock().clear();
        if let Err(e) = self.transport.close().await {
            debug!("Transport close on {}: {}", self.connection_id, e);
        }
        info!("Closed peer connection {}", self.connection_id);
    }
}

impl std::fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerConnection")
            .field("role", &self.role)
            .field("connection_id", &self.connection_id)
            .field("remote_id", &self.remote_id)
            .field("state", &self.state())
            .field("channel_open", &self.is_channel_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{RpcCall, SongSummary};
    use crate::peer::TransportEvent;
    use crate::testing::{MockNetwork, MockOp};

    async fn peer(
        network: &MockNetwork,
        role: Role,
    ) -> (PeerConnection, mpsc::UnboundedReceiver<PeerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let factory = network.factory();
        let peer = PeerConnection::new(
            role,
            "remote".to_string(),
            &ChannelConfig::default(),
            factory.as_ref(),
            tx,
        )
        .await
        .unwrap();
        (peer, rx)
    }

    #[tokio::test]
    async fn test_guest_creates_channel_before_offer() {
        let network = MockNetwork::new();
        let (guest, _rx) = peer(&network, Role::Guest).await;

        let sdp = guest.create_offer().await.unwrap();
        assert!(sdp.starts_with("mock-offer:"));
        assert_eq!(
            network.ops(),
            vec![
                MockOp::CreateDataChannel {
                    transport: 0,
                    label: "game-rpc".to_string()
                },
                MockOp::CreateOffer { transport: 0 },
            ]
        );
    }

    #[tokio::test]
    async fn test_role_mismatch() {
        let network = MockNetwork::new();
        let (host, _rx) = peer(&network, Role::Host).await;

        let err = host.create_offer().await.unwrap_err();
        assert!(matches!(
            err,
            Error::RoleMismatch {
                role: "host",
                operation: "create_offer"
            }
        ));
        assert!(host.apply_answer("mock-answer:9").await.is_err());
    }

    #[tokio::test]
    async fn test_candidates_wait_for_answer() {
        let network = MockNetwork::new();
        let (guest, _rx) = peer(&network, Role::Guest).await;
        guest.create_offer().await.unwrap();

        guest.add_remote_candidate("mock-candidate:a".into()).await;
        guest.add_remote_candidate("mock-candidate:b".into()).await;
        assert_eq!(guest.buffered_candidates(), 2);
        assert!(!network
            .ops()
            .iter()
            .any(|op| matches!(op, MockOp::AddCandidate { .. })));

        guest.apply_answer("mock-answer:99").await.unwrap();
        guest.add_remote_candidate("mock-candidate:c".into()).await;

        let applied: Vec<String> = network
            .ops()
            .into_iter()
            .filter_map(|op| match op {
                MockOp::AddCandidate { candidate, .. } => Some(candidate),
                _ => None,
            })
            .collect();
        assert_eq!(
            applied,
            vec!["mock-candidate:a", "mock-candidate:b", "mock-candidate:c"]
        );
        assert_eq!(guest.buffered_candidates(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_answer_ignored() {
        let network = MockNetwork::new();
        let (guest, _rx) = peer(&network, Role::Guest).await;
        guest.create_offer().await.unwrap();

        guest.apply_answer("mock-answer:1").await.unwrap();
        guest.apply_answer("mock-answer:2").await.unwrap();

        let applied = network
            .ops()
            .iter()
            .filter(|op| matches!(op, MockOp::SetRemoteDescription { .. }))
            .count();
        assert_eq!(applied, 1);
    }

    #[tokio::test]
    async fn test_rejected_answer_can_be_retried() {
        let network = MockNetwork::new();
        let (guest, _rx) = peer(&network, Role::Guest).await;
        guest.create_offer().await.unwrap();
        guest.add_remote_candidate("mock-candidate:a".into()).await;

        network.fail_remote_descriptions(true);
        assert!(guest.apply_answer("mock-answer:1").await.is_err());
        assert_eq!(guest.buffered_candidates(), 1);

        network.fail_remote_descriptions(false);
        guest.apply_answer("mock-answer:1").await.unwrap();
        assert_eq!(guest.buffered_candidates(), 0);

        let applied = network
            .ops()
            .iter()
            .filter(|op| matches!(op, MockOp::SetRemoteDescription { .. }))
            .count();
        assert_eq!(applied, 2);
    }

    #[tokio::test]
    async fn test_bad_candidate_is_not_fatal() {
        let network = MockNetwork::new();
        let (host, _rx) = peer(&network, Role::Host).await;
        host.create_answer("mock-offer:42").await.unwrap();

        host.add_remote_candidate("garbage".into()).await;
        host.add_remote_candidate("mock-candidate:1".into()).await;
        assert!(!host.is_closed());
    }

    #[tokio::test]
    async fn test_linked_pair_exchanges_messages() {
        let network = MockNetwork::new();
        let (guest, mut guest_rx) = peer(&network, Role::Guest).await;
        let (host, mut host_rx) = peer(&network, Role::Host).await;

        let offer = guest.create_offer().await.unwrap();
        let answer = host.create_answer(&offer).await.unwrap();
        guest.apply_answer(&answer).await.unwrap();

        assert!(guest.is_channel_open());
        assert!(host.is_channel_open());
        assert_eq!(guest.state(), ConnectionState::Connected);

        assert!(guest.send(&ChannelMessage::request(1, RpcCall::SongsList)).await);
        let received = loop {
            let event = host_rx.recv().await.unwrap();
            if let TransportEvent::MessageReceived(text) = event.event {
                break text;
            }
        };
        assert!(ChannelMessage::from_text(&received).unwrap().is_request());

        let push = ChannelMessage::songs_push(vec![SongSummary {
            hash: "h".into(),
            title: "t".into(),
            artist: "a".into(),
        }]);
        assert!(host.send(&push).await);
        let event = loop {
            let event = guest_rx.recv().await.unwrap();
            if matches!(event.event, TransportEvent::MessageReceived(_)) {
                break event;
            }
        };
        assert_eq!(event.connection_id, guest.connection_id());
    }

    #[tokio::test]
    async fn test_send_on_closed_channel_is_noop() {
        let network = MockNetwork::new();
        let (guest, _rx) = peer(&network, Role::Guest).await;
        guest.create_offer().await.unwrap();

        assert!(!guest.send(&ChannelMessage::request(1, RpcCall::Ping)).await);
        assert!(!network
            .ops()
            .iter()
            .any(|op| matches!(op, MockOp::Send { .. })));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let network = MockNetwork::new();
        let (guest, _rx) = peer(&network, Role::Guest).await;

        guest.close().await;
        guest.close().await;

        assert!(guest.is_closed());
        assert_eq!(guest.state(), ConnectionState::Closed);
        let closes = network
            .ops()
            .iter()
            .filter(|op| matches!(op, MockOp::Close { .. }))
            .count();
        assert_eq!(closes, 1);
        assert!(matches!(
            guest.create_offer().await.unwrap_err(),
            Error::ConnectionClosed(_)
        ));
    }
}
