//! Signaling wire types exchanged over the relay

use serde::{Deserialize, Serialize};

/// Why a peer is intentionally ending the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoodbyeReason {
    /// The guest left on purpose
    UserLeft,
    /// The host closed the lobby
    LobbyClosed,
    /// The peer gave up waiting
    Timeout,
    /// The peer hit an unrecoverable error
    Error,
}

/// Signaling message relayed between a guest and the host
///
/// `sdp` and `candidate` are opaque strings produced by the transport; they
/// are round-tripped, never inspected.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalMessage {
    /// Connection offer (guest → host)
    Offer {
        /// SDP offer
        sdp: String,
        /// Sender identity
        from: String,
    },

    /// Connection answer (host → guest)
    Answer {
        /// SDP answer
        sdp: String,
        /// Sender identity
        from: String,
        /// Addressed guest, used by the relay for routing
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<String>,
    },

    /// Network-path candidate (both directions)
    IceCandidate {
        /// Serialized candidate
        candidate: String,
        /// Sender identity
        from: String,
        /// Addressed guest when sent by the host
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<String>,
    },

    /// Authoritative end of session
    Goodbye {
        /// Sender identity
        from: String,
        /// Why the session ended
        reason: GoodbyeReason,
    },
}

/// A signaling message received by the host, tagged with the guest it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSignal {
    /// Identity of the sending guest
    pub guest_id: String,
    /// The message itself
    pub message: SignalMessage,
}

impl SignalMessage {
    /// Create an offer
    pub fn offer(sdp: impl Into<String>, from: impl Into<String>) -> Self {
        SignalMessage::Offer {
            sdp: sdp.into(),
            from: from.into(),
        }
    }

    /// Create an answer addressed to a guest
    pub fn answer(sdp: impl Into<String>, from: impl Into<String>, to: impl Into<String>) -> Self {
        SignalMessage::Answer {
            sdp: sdp.into(),
            from: from.into(),
            to: Some(to.into()),
        }
    }

    /// Create a candidate message; `to` is set when the host is the sender
    pub fn ice_candidate(
        candidate: impl Into<String>,
        from: impl Into<String>,
        to: Option<String>,
    ) -> Self {
        SignalMessage::IceCandidate {
            candidate: candidate.into(),
            from: from.into(),
            to,
        }
    }

    /// Create a goodbye
    pub fn goodbye(from: impl Into<String>, reason: GoodbyeReason) -> Self {
        SignalMessage::Goodbye {
            from: from.into(),
            reason,
        }
    }

    /// Sender identity
    pub fn from(&self) -> &str {
        match self {
            SignalMessage::Offer { from, .. }
            | SignalMessage::Answer { from, .. }
            | SignalMessage::IceCandidate { from, .. }
            | SignalMessage::Goodbye { from, .. } => from,
        }
    }

    /// Replace the sender identity
    ///
    /// Relays overwrite `from` with the authenticated identity so a guest
    /// cannot speak for another one.
    pub fn with_from(mut self, identity: impl Into<String>) -> Self {
        let identity = identity.into();
        match &mut self {
            SignalMessage::Offer { from, .. }
            | SignalMessage::Answer { from, .. }
            | SignalMessage::IceCandidate { from, .. }
            | SignalMessage::Goodbye { from, .. } => *from = identity,
        }
        self
    }

    /// Wire tag of this message
    pub fn kind(&self) -> &'static str {
        match self {
            SignalMessage::Offer { .. } => "offer",
            SignalMessage::Answer { .. } => "answer",
            SignalMessage::IceCandidate { .. } => "ice-candidate",
            SignalMessage::Goodbye { .. } => "goodbye",
        }
    }

    /// Convert message to JSON string
    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string(self).map_err(|e| {
            crate::Error::SerializationError(format!("Failed to serialize signal: {}", e))
        })
    }

    /// Parse message from JSON string
    pub fn from_json(json: &str) -> crate::Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            crate::Error::SerializationError(format!("Failed to deserialize signal: {}", e))
        })
    }
}
