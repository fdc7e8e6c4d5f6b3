//! Error types for the peer link

/// Result type alias using the peer link Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while establishing or using a peer link
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A `PeerLinkConfig` value failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Signaling relay error (send failure, subscription failure, stream error)
    #[error("Signaling error: {0}")]
    SignalingError(String),

    /// Guest not found in the host registry
    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    /// Deadline passed (connection, heartbeat ping or request)
    #[error("Operation timeout: {0}")]
    OperationTimeout(String),

    /// The connection (or its data channel) went away while an operation was pending
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// Operation not available for this side of the connection
    #[error("Operation not supported for {role} role: {operation}")]
    RoleMismatch {
        /// Role of the connection the operation was invoked on
        role: &'static str,
        /// Name of the rejected operation
        operation: &'static str,
    },

    /// A path candidate could not be parsed or applied
    #[error("ICE candidate error: {0}")]
    IceCandidateError(String),

    /// Offer or answer could not be created or applied
    #[error("SDP negotiation error: {0}")]
    SdpError(String),

    /// Creating or sending on the data channel failed
    #[error("Data channel error: {0}")]
    DataChannelError(String),

    /// Remote procedure returned an error
    #[error("Remote call failed: {0}")]
    RemoteError(String),

    /// Malformed signaling or channel JSON
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// An actor stopped or an invariant broke
    #[error("Internal error: {0}")]
    InternalError(String),

    /// webrtc-rs reported a failure outside negotiation
    #[error("WebRTC error: {0}")]
    WebRtcError(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}
