//! Application messages carried over the game data channel
//!
//! Every data channel payload is one JSON-encoded [`ChannelMessage`]:
//! requests from the guest, responses from the host, and unsolicited pushes
//! from the host.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Maximum encoded message size accepted for sending (64 KB, the default
/// SCTP message limit of the transport)
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// A song the host can play
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SongSummary {
    /// Content hash identifying the song
    pub hash: String,
    /// Song title
    pub title: String,
    /// Performing artist
    pub artist: String,
}

/// Reply to a ping
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pong {
    /// Host wall clock in milliseconds since the Unix epoch
    pub timestamp: u64,
}

/// Procedures a guest may call on the host
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "method")]
pub enum RpcCall {
    /// Liveness probe
    #[serde(rename = "ping")]
    Ping,
    /// List the host's songs
    #[serde(rename = "songs.list")]
    SongsList,
}

impl RpcCall {
    /// Procedure name on the wire
    pub fn method(&self) -> &'static str {
        match self {
            RpcCall::Ping => "ping",
            RpcCall::SongsList => "songs.list",
        }
    }
}

/// Result of a procedure call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RpcReply {
    /// Reply to [`RpcCall::Ping`]
    Pong {
        /// Host wall clock in milliseconds since the Unix epoch
        timestamp: u64,
    },
    /// Reply to [`RpcCall::SongsList`]
    Songs {
        /// Every song the host has
        songs: Vec<SongSummary>,
    },
    /// The call failed on the host
    Error {
        /// Human readable reason
        message: String,
    },
}

/// Unsolicited host → guest notification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "topic", rename_all = "snake_case")]
pub enum PushMessage {
    /// The host's song list (sent on channel open and whenever it changes)
    Songs {
        /// Every song the host has
        songs: Vec<SongSummary>,
    },
}

/// Envelope for everything sent over the data channel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChannelMessage {
    /// Guest → host call
    Request {
        /// Correlation id, unique per guest connection
        id: u64,
        /// The procedure
        call: RpcCall,
    },
    /// Host → guest answer to a request
    Response {
        /// Id of the request being answered
        id: u64,
        /// The outcome
        reply: RpcReply,
    },
    /// Host → guest notification
    Push(PushMessage),
}

impl ChannelMessage {
    /// Create a request
    pub fn request(id: u64, call: RpcCall) -> Self {
        ChannelMessage::Request { id, call }
    }

    /// Create a response
    pub fn response(id: u64, reply: RpcReply) -> Self {
        ChannelMessage::Response { id, reply }
    }

    /// Create a song list push
    pub fn songs_push(songs: Vec<SongSummary>) -> Self {
        ChannelMessage::Push(PushMessage::Songs { songs })
    }

    /// Serialize for transmission
    pub fn to_text(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize a received payload
    pub fn from_text(text: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Check if this is a request
    pub fn is_request(&self) -> bool {
        matches!(self, ChannelMessage::Request { .. })
    }

    /// Check if this is a response
    pub fn is_response(&self) -> bool {
        matches!(self, ChannelMessage::Response { .. })
    }
}

/// Milliseconds since the Unix epoch
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
