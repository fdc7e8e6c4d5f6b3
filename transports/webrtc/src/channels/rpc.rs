//! Request/response client over the game data channel
//!
//! Requests are correlated by id. The owner of the connection feeds every
//! received response into [`RpcClient::handle_response`]; when the
//! connection goes away it calls [`RpcClient::fail_all`].

use super::messages::{ChannelMessage, Pong, RpcCall, RpcReply, SongSummary};
use crate::peer::{ConnectionId, PeerConnection};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, trace};

/// Guest-side client for the host's procedures
pub struct RpcClient {
    peer: Arc<PeerConnection>,
    pending: Mutex<HashMap<u64, oneshot::Sender<RpcReply>>>,
    next_id: AtomicU64,
    timeout: Duration,
}

impl RpcClient {
    pub fn new(peer: Arc<PeerConnection>, timeout: Duration) -> Self {
        Self {
            peer,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            timeout,
        }
    }

    /// Connection this client talks over
    pub fn connection_id(&self) -> ConnectionId {
        self.peer.connection_id()
    }

    /// Whether requests can currently be sent
    pub fn is_ready(&self) -> bool {
        self.peer.is_channel_open()
    }

    /// Requests awaiting a response
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Call a procedure and wait for its reply
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the channel is not open or closes while waiting
    /// - [`Error::OperationTimeout`] if no reply arrives in time
    /// - [`Error::RemoteError`] if the host answered with an error
    pub async fn call(&self, call: RpcCall) -> Result<RpcReply> {
        if !self.peer.is_channel_open() {
            return Err(Error::ConnectionClosed(format!(
                "data channel not open for {}",
                call.method()
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let method = call.method();
        if !self.peer.send(&ChannelMessage::request(id, call)).await {
            self.pending.lock().remove(&id);
            return Err(Error::ConnectionClosed(format!(
                "failed to send {} request",
                method
            )));
        }
        trace!("Sent {} request {}", method, id);

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(RpcReply::Error { message })) => Err(Error::RemoteError(message)),
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(Error::ConnectionClosed(format!(
                "connection closed while waiting for {} response",
                method
            ))),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(Error::OperationTimeout(format!(
                    "{} request {} got no response within {}ms",
                    method,
                    id,
                    self.timeout.as_millis()
                )))
            }
        }
    }

    /// Round-trip a ping
    pub async fn ping(&self) -> Result<Pong> {
        match self.call(RpcCall::Ping).await? {
            RpcReply::Pong { timestamp } => Ok(Pong { timestamp }),
            other => Err(unexpected("ping", &other)),
        }
    }

    /// Fetch the host's song list
    pub async fn list_songs(&self) -> Result<Vec<SongSummary>> {
        match self.call(RpcCall::SongsList).await? {
            RpcReply::Songs { songs } => Ok(songs),
            other => Err(unexpected("songs.list", &other)),
        }
    }

    /// Complete the request `id`; returns false if nobody is waiting for it
    pub fn handle_response(&self, id: u64, reply: RpcReply) -> bool {
        match self.pending.lock().remove(&id) {
            Some(tx) => tx.send(reply).is_ok(),
            None => {
                debug!("Response {} matches no pending request", id);
                false
            }
        }
    }

    /// Fail every pending request with a closed-connection error
    pub fn fail_all(&self) {
        let pending = std::mem::take(&mut *self.pending.lock());
        if !pending.is_empty() {
            debug!("Failing {} pending requests", pending.len());
        }
    }
}

fn unexpected(method: &str, reply: &RpcReply) -> Error {
    Error::InternalError(format!("unexpected reply to {}: {:?}", method, reply))
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("connection_id", &self.connection_id())
            .field("pending", &self.pending())
            .field("timeout", &self.timeout)
            .finish()
    }
}
