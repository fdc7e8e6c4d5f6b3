//! Signaling relay seam
//!
//! The relay itself is external; this module defines what the peer link
//! consumes from it. A guest publishes to the host and listens on its own
//! channel, the host publishes to a named guest and listens to everybody.
//! Subscriptions are abortable so a new connection attempt can drop the
//! previous stream before it proceeds.

pub mod memory;
pub mod protocol;

pub use memory::{GuestRelay, HostRelay, MemoryRelay};
pub use protocol::{GoodbyeReason, HostSignal, SignalMessage};

use crate::Result;
use async_trait::async_trait;
use futures::future::{AbortHandle, Abortable};
use futures::stream::{BoxStream, StreamExt};

/// Abortable stream of incoming signaling messages
///
/// Aborting (or dropping) ends the stream; pending `next()` calls resolve to
/// `None`.
pub struct SignalSubscription<T> {
    stream: Abortable<BoxStream<'static, Result<T>>>,
    handle: AbortHandle,
}

impl<T> SignalSubscription<T> {
    /// Wrap a stream into an abortable subscription
    pub fn new(stream: BoxStream<'static, Result<T>>) -> Self {
        let (handle, registration) = AbortHandle::new_pair();
        Self {
            stream: Abortable::new(stream, registration),
            handle,
        }
    }

    /// Next message, `None` once the stream ended or was aborted
    pub async fn next(&mut self) -> Option<Result<T>> {
        self.stream.next().await
    }

    /// Stop delivering messages
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Handle that aborts this subscription from elsewhere
    pub fn abort_handle(&self) -> AbortHandle {
        self.handle.clone()
    }

    /// Whether `abort()` was called
    pub fn is_aborted(&self) -> bool {
        self.handle.is_aborted()
    }
}

impl<T> Drop for SignalSubscription<T> {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl<T> std::fmt::Debug for SignalSubscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalSubscription")
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

/// Guest side of the relay
#[async_trait]
pub trait GuestSignaling: Send + Sync {
    /// Publish a message to the host of the lobby
    async fn send_signal(&self, message: SignalMessage) -> Result<()>;

    /// Subscribe to messages addressed to this guest
    async fn subscribe_as_guest(&self) -> Result<SignalSubscription<SignalMessage>>;
}

/// Host side of the relay
#[async_trait]
pub trait HostSignaling: Send + Sync {
    /// Publish a message to one guest
    async fn send_signal(&self, message: SignalMessage, to_guest: &str) -> Result<()>;

    /// Subscribe to messages from every guest of the lobby
    async fn subscribe_as_host(&self) -> Result<SignalSubscription<HostSignal>>;
}
