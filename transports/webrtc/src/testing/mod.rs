//! In-memory transport network for tests and simulations
//!
//! Transports created from one [`MockNetwork`] find each other through
//! their SDP: a guest offer reads `mock-offer:<n>` and a host answer reads
//! `mock-answer:<n>`. Once the guest applies the answer both ends report
//! `Connected` and an open data channel, and `send` on one side is delivered
//! to the other. Every call is journaled so tests can assert ordering.

use crate::peer::transport::{
    ConnectionId, ConnectionState, EventSink, Role, RtcTransport, SdpKind, TransportEvent,
    TransportFactory,
};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// One journaled transport call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOp {
    CreateDataChannel { transport: u64, label: String },
    CreateOffer { transport: u64 },
    CreateAnswer { transport: u64 },
    SetRemoteDescription { transport: u64, kind: SdpKind },
    AddCandidate { transport: u64, candidate: String },
    Send { transport: u64, text: String },
    Close { transport: u64 },
}

impl MockOp {
    pub fn transport(&self) -> u64 {
        match self {
            MockOp::CreateDataChannel { transport, .. }
            | MockOp::CreateOffer { transport }
            | MockOp::CreateAnswer { transport }
            | MockOp::SetRemoteDescription { transport, .. }
            | MockOp::AddCandidate { transport, .. }
            | MockOp::Send { transport, .. }
            | MockOp::Close { transport } => *transport,
        }
    }
}

#[derive(Default)]
struct Faults {
    offer: AtomicBool,
    answer: AtomicBool,
    remote_description: AtomicBool,
    candidates: AtomicBool,
    drop_messages: AtomicBool,
    stall: AtomicBool,
}

#[derive(Default)]
struct NetworkInner {
    next_id: AtomicU64,
    transports: Mutex<HashMap<u64, Weak<MockTransport>>>,
    ops: Mutex<Vec<MockOp>>,
    faults: Faults,
}

impl NetworkInner {
    fn record(&self, op: MockOp) {
        self.ops.lock().push(op);
    }

    fn lookup(&self, id: u64) -> Option<Arc<MockTransport>> {
        self.transports.lock().get(&id).and_then(Weak::upgrade)
    }
}

/// Shared switchboard for mock transports
#[derive(Clone, Default)]
pub struct MockNetwork {
    inner: Arc<NetworkInner>,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory creating transports on this network
    pub fn factory(&self) -> Arc<MockTransportFactory> {
        Arc::new(MockTransportFactory {
            network: Arc::clone(&self.inner),
        })
    }

    /// Every transport call so far, in order
    pub fn ops(&self) -> Vec<MockOp> {
        self.inner.ops.lock().clone()
    }

    /// Calls made on one transport, in order
    pub fn ops_for(&self, transport: u64) -> Vec<MockOp> {
        self.inner
            .ops
            .lock()
            .iter()
            .filter(|op| op.transport() == transport)
            .cloned()
            .collect()
    }

    /// Number of transports created so far
    pub fn created(&self) -> usize {
        self.inner.next_id.load(Ordering::SeqCst) as usize
    }

    /// Transports created and not yet closed, optionally filtered by role
    pub fn live_transports(&self, role: Option<Role>) -> Vec<Arc<MockTransport>> {
        let mut live: Vec<_> = self
            .inner
            .transports
            .lock()
            .values()
            .filter_map(Weak::upgrade)
            .filter(|t| !t.is_closed() && role.is_none_or(|r| t.role == r))
            .collect();
        live.sort_by_key(|t| t.id);
        live
    }

    /// Most recently created transport of `role`
    pub fn latest(&self, role: Role) -> Option<Arc<MockTransport>> {
        self.inner
            .transports
            .lock()
            .values()
            .filter_map(Weak::upgrade)
            .filter(|t| t.role == role)
            .max_by_key(|t| t.id)
    }

    /// Make `create_offer` fail
    pub fn fail_offers(&self, fail: bool) {
        self.inner.faults.offer.store(fail, Ordering::SeqCst);
    }

    /// Make `create_answer` fail
    pub fn fail_answers(&self, fail: bool) {
        self.inner.faults.answer.store(fail, Ordering::SeqCst);
    }

    /// Make `set_remote_description` fail
    pub fn fail_remote_descriptions(&self, fail: bool) {
        self.inner
            .faults
            .remote_description
            .store(fail, Ordering::SeqCst);
    }

    /// Make `add_ice_candidate` fail
    pub fn fail_candidates(&self, fail: bool) {
        self.inner.faults.candidates.store(fail, Ordering::SeqCst);
    }

    /// Accept sends but never deliver them
    pub fn drop_messages(&self, drop: bool) {
        self.inner.faults.drop_messages.store(drop, Ordering::SeqCst);
    }

    /// Link transports without ever reporting them connected
    pub fn stall_connections(&self, stall: bool) {
        self.inner.faults.stall.store(stall, Ordering::SeqCst);
    }

    /// Report a state change on every live transport
    pub fn emit_all(&self, state: ConnectionState) {
        for transport in self.live_transports(None) {
            transport.emit(TransportEvent::StateChanged(state));
        }
    }
}

/// [`TransportFactory`] for a [`MockNetwork`]
pub struct MockTransportFactory {
    network: Arc<NetworkInner>,
}

#[async_trait]
impl TransportFactory for MockTransportFactory {
    async fn create(&self, role: Role, sink: EventSink) -> Result<Arc<dyn RtcTransport>> {
        let id = self.network.next_id.fetch_add(1, Ordering::SeqCst);
        let transport = Arc::new_cyclic(|weak| MockTransport {
            id,
            role,
            sink,
            network: Arc::clone(&self.network),
            this: weak.clone(),
            peer: Mutex::new(None),
            label: Mutex::new(None),
            remote_description_set: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });
        self.network
            .transports
            .lock()
            .insert(id, Arc::downgrade(&transport));
        debug!("Mock {} transport {} created", role, id);
        Ok(transport)
    }
}

/// A transport that lives entirely in memory
pub struct MockTransport {
    id: u64,
    role: Role,
    sink: EventSink,
    network: Arc<NetworkInner>,
    this: Weak<MockTransport>,
    peer: Mutex<Option<Weak<MockTransport>>>,
    label: Mutex<Option<String>>,
    remote_description_set: AtomicBool,
    closed: AtomicBool,
}

impl MockTransport {
    /// Network-wide sequence number of this transport
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Id of the connection that owns this transport
    pub fn connection_id(&self) -> ConnectionId {
        self.sink.connection_id()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Candidate string this transport announces
    pub fn local_candidate(&self) -> String {
        format!("mock-candidate:{}", self.id)
    }

    /// Inject an event as if the transport reported it
    pub fn emit(&self, event: TransportEvent) {
        self.sink.emit(event);
    }

    fn peer(&self) -> Option<Arc<MockTransport>> {
        self.peer.lock().as_ref().and_then(Weak::upgrade)
    }

    fn ensure_open(&self, operation: &str) -> Result<()> {
        if self.is_closed() {
            return Err(Error::WebRtcError(format!(
                "{} on closed mock transport {}",
                operation, self.id
            )));
        }
        Ok(())
    }

    fn link(&self, host: &Arc<MockTransport>) {
        *self.peer.lock() = Some(Arc::downgrade(host));
        *host.peer.lock() = Some(self.this.clone());

        if self.network.faults.stall.load(Ordering::SeqCst) {
            return;
        }

        let has_channel = self.label.lock().is_some();
        for side in [host.as_ref(), self] {
            side.emit(TransportEvent::StateChanged(ConnectionState::Connected));
            if has_channel {
                side.emit(TransportEvent::ChannelOpen);
            }
        }
    }
}

fn parse_token(sdp: &str, prefix: &str) -> Result<u64> {
    sdp.strip_prefix(prefix)
        .and_then(|id| id.parse().ok())
        .ok_or_else(|| Error::SdpError(format!("unparseable mock description: {}", sdp)))
}

#[async_trait]
impl RtcTransport for MockTransport {
    async fn create_data_channel(&self, label: &str, _ordered: bool) -> Result<()> {
        self.ensure_open("create_data_channel")?;
        self.network.record(MockOp::CreateDataChannel {
            transport: self.id,
            label: label.to_string(),
        });
        *self.label.lock() = Some(label.to_string());
        Ok(())
    }

    async fn create_offer(&self) -> Result<String> {
        self.ensure_open("create_offer")?;
        self.network.record(MockOp::CreateOffer { transport: self.id });
        if self.network.faults.offer.load(Ordering::SeqCst) {
            return Err(Error::SdpError("mock offer failure".to_string()));
        }

        self.emit(TransportEvent::StateChanged(ConnectionState::Connecting));
        self.emit(TransportEvent::CandidateDiscovered(self.local_candidate()));
        Ok(format!("mock-offer:{}", self.id))
    }

    async fn create_answer(&self) -> Result<String> {
        self.ensure_open("create_answer")?;
        self.network.record(MockOp::CreateAnswer { transport: self.id });
        if self.network.faults.answer.load(Ordering::SeqCst) {
            return Err(Error::SdpError("mock answer failure".to_string()));
        }
        if !self.remote_description_set.load(Ordering::SeqCst) {
            return Err(Error::SdpError("answer requires a remote offer".to_string()));
        }

        self.emit(TransportEvent::StateChanged(ConnectionState::Connecting));
        self.emit(TransportEvent::CandidateDiscovered(self.local_candidate()));
        Ok(format!("mock-answer:{}", self.id))
    }

    async fn set_remote_description(&self, kind: SdpKind, sdp: &str) -> Result<()> {
        self.ensure_open("set_remote_description")?;
        self.network.record(MockOp::SetRemoteDescription {
            transport: self.id,
            kind,
        });
        if self.network.faults.remote_description.load(Ordering::SeqCst) {
            return Err(Error::SdpError("mock remote description failure".to_string()));
        }

        match kind {
            SdpKind::Offer => {
                let guest_id = parse_token(sdp, "mock-offer:")?;
                *self.peer.lock() = self.network.lookup(guest_id).map(|t| Arc::downgrade(&t));
            }
            SdpKind::Answer => {
                let host_id = parse_token(sdp, "mock-answer:")?;
                if let Some(host) = self.network.lookup(host_id) {
                    self.link(&host);
                }
            }
        }
        self.remote_description_set.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &str) -> Result<()> {
        self.ensure_open("add_ice_candidate")?;
        self.network.record(MockOp::AddCandidate {
            transport: self.id,
            candidate: candidate.to_string(),
        });
        if !self.remote_description_set.load(Ordering::SeqCst) {
            return Err(Error::IceCandidateError(
                "candidate applied before remote description".to_string(),
            ));
        }
        if self.network.faults.candidates.load(Ordering::SeqCst)
            || !candidate.starts_with("mock-candidate:")
        {
            return Err(Error::IceCandidateError(format!(
                "rejected candidate {}",
                candidate
            )));
        }
        Ok(())
    }

    async fn send(&self, text: &str) -> Result<()> {
        self.ensure_open("send")?;
        self.network.record(MockOp::Send {
            transport: self.id,
            text: text.to_string(),
        });
        if self.network.faults.drop_messages.load(Ordering::SeqCst) {
            return Ok(());
        }

        match self.peer() {
            Some(peer) if !peer.is_closed() => {
                peer.emit(TransportEvent::MessageReceived(text.to_string()));
                Ok(())
            }
            _ => Err(Error::DataChannelError(format!(
                "mock transport {} has no connected peer",
                self.id
            ))),
        }
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.network.record(MockOp::Close { transport: self.id });

        if let Some(peer) = self.peer() {
            if !peer.is_closed() {
                peer.emit(TransportEvent::ChannelClosed);
                peer.emit(TransportEvent::StateChanged(ConnectionState::Closed));
            }
        }
        Ok(())
    }
}
