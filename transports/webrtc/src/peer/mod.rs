//! Peer connection building blocks
//!
//! Candidate buffering, liveness probing, reconnect backoff and the
//! role-parameterised connection over a pluggable transport.

pub mod backoff;
pub mod candidate_buffer;
pub mod connection;
pub mod heartbeat;
pub mod transport;
pub mod webrtc_transport;

pub use backoff::ReconnectPolicy;
pub use candidate_buffer::{CandidateDisposition, PathCandidateBuffer};
pub use connection::PeerConnection;
pub use heartbeat::Heartbeat;
pub use transport::{
    ConnectionId, ConnectionState, EventSink, LinkStatus, PeerEvent, Role, RtcTransport, SdpKind,
    TransportEvent, TransportFactory,
};
pub use webrtc_transport::{WebRtcTransport, WebRtcTransportFactory};
