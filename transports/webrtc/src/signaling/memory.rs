//! In-process signaling relay
//!
//! Mirrors the lobby pub/sub layout of the production relay: the host
//! listens on `lobby:<id>:host`, each guest on `lobby:<id>:guest:<user>`.
//! Guest sends always carry the authenticated guest identity in `from`.
//! Messages published to a channel nobody listens on are dropped.

use super::protocol::{HostSignal, SignalMessage};
use super::{GuestSignaling, HostSignaling, SignalSubscription};
use crate::{Error, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

enum Delivery {
    Message(SignalMessage),
    Fault(String),
}

#[derive(Default)]
struct RelayInner {
    subscribers: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<Delivery>>>>,
    journal: Mutex<Vec<(String, SignalMessage)>>,
    fail_sends: AtomicBool,
}

/// Shared in-memory relay; clone freely
#[derive(Clone, Default)]
pub struct MemoryRelay {
    inner: Arc<RelayInner>,
}

impl MemoryRelay {
    /// Create an empty relay
    pub fn new() -> Self {
        Self::default()
    }

    /// Channel the host of `lobby_id` listens on
    pub fn host_channel(lobby_id: &str) -> String {
        format!("lobby:{}:host", lobby_id)
    }

    /// Channel guest `user_id` of `lobby_id` listens on
    pub fn guest_channel(lobby_id: &str, user_id: &str) -> String {
        format!("lobby:{}:guest:{}", lobby_id, user_id)
    }

    /// Signaling handle for a guest
    pub fn guest(&self, lobby_id: impl Into<String>, user_id: impl Into<String>) -> GuestRelay {
        GuestRelay {
            relay: self.clone(),
            lobby_id: lobby_id.into(),
            user_id: user_id.into(),
        }
    }

    /// Signaling handle for the host
    pub fn host(&self, lobby_id: impl Into<String>) -> HostRelay {
        HostRelay {
            relay: self.clone(),
            lobby_id: lobby_id.into(),
        }
    }

    /// Make every subsequent send fail (or succeed again)
    pub fn set_fail_sends(&self, fail: bool) {
        self.inner.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Every message published so far, with its channel, in order
    pub fn published(&self) -> Vec<(String, SignalMessage)> {
        self.inner.journal.lock().clone()
    }

    /// Messages published to `channel`, in order
    pub fn published_to(&self, channel: &str) -> Vec<SignalMessage> {
        self.inner
            .journal
            .lock()
            .iter()
            .filter(|(c, _)| c == channel)
            .map(|(_, m)| m.clone())
            .collect()
    }

    /// Number of live subscriptions on `channel`
    pub fn subscriber_count(&self, channel: &str) -> usize {
        let mut subscribers = self.inner.subscribers.lock();
        match subscribers.get_mut(channel) {
            Some(senders) => {
                senders.retain(|tx| !tx.is_closed());
                senders.len()
            }
            None => 0,
        }
    }

    /// Deliver a stream error to every subscriber of `channel`
    pub fn inject_fault(&self, channel: &str, reason: impl Into<String>) {
        let reason = reason.into();
        if let Some(senders) = self.inner.subscribers.lock().get(channel) {
            for tx in senders {
                let _ = tx.send(Delivery::Fault(reason.clone()));
            }
        }
    }

    /// End every subscription on `channel`
    pub fn close_channel(&self, channel: &str) {
        self.inner.subscribers.lock().remove(channel);
    }

    fn publish(&self, channel: String, message: SignalMessage) -> Result<()> {
        if self.inner.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::SignalingError(format!(
                "relay rejected {} on {}",
                message.kind(),
                channel
            )));
        }

        self.inner
            .journal
            .lock()
            .push((channel.clone(), message.clone()));

        let mut subscribers = self.inner.subscribers.lock();
        match subscribers.get_mut(&channel) {
            Some(senders) => {
                senders.retain(|tx| tx.send(Delivery::Message(message.clone())).is_ok());
                trace!("Published {} to {} ({} subscribers)", message.kind(), channel, senders.len());
            }
            None => debug!("Dropped {} on {}: no subscribers", message.kind(), channel),
        }
        Ok(())
    }

    fn subscribe(&self, channel: String) -> mpsc::UnboundedReceiver<Delivery> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .subscribers
            .lock()
            .entry(channel)
            .or_default()
            .push(tx);
        rx
    }
}

fn into_stream<T, F>(
    rx: mpsc::UnboundedReceiver<Delivery>,
    map: F,
) -> SignalSubscription<T>
where
    T: Send + 'static,
    F: Fn(SignalMessage) -> T + Send + Sync + 'static,
{
    let stream = stream::unfold((rx, map), |(mut rx, map)| async move {
        let item = match rx.recv().await? {
            Delivery::Message(message) => Ok(map(message)),
            Delivery::Fault(reason) => Err(Error::SignalingError(reason)),
        };
        Some((item, (rx, map)))
    });
    SignalSubscription::new(stream.boxed())
}

/// Guest handle bound to one lobby and one authenticated identity
#[derive(Clone)]
pub struct GuestRelay {
    relay: MemoryRelay,
    lobby_id: String,
    user_id: String,
}

impl GuestRelay {
    /// Authenticated identity of this guest
    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

#[async_trait]
impl GuestSignaling for GuestRelay {
    async fn send_signal(&self, message: SignalMessage) -> Result<()> {
        let message = message.with_from(self.user_id.clone());
        self.relay
            .publish(MemoryRelay::host_channel(&self.lobby_id), message)
    }

    async fn subscribe_as_guest(&self) -> Result<SignalSubscription<SignalMessage>> {
        let rx = self
            .relay
            .subscribe(MemoryRelay::guest_channel(&self.lobby_id, &self.user_id));
        Ok(into_stream(rx, |message| message))
    }
}

/// Host handle bound to one lobby
#[derive(Clone)]
pub struct HostRelay {
    relay: MemoryRelay,
    lobby_id: String,
}

#[async_trait]
impl HostSignaling for HostRelay {
    async fn send_signal(&self, message: SignalMessage, to_guest: &str) -> Result<()> {
        self.relay
            .publish(MemoryRelay::guest_channel(&self.lobby_id, to_guest), message)
    }

    async fn subscribe_as_host(&self) -> Result<SignalSubscription<HostSignal>> {
        let rx = self.relay.subscribe(MemoryRelay::host_channel(&self.lobby_id));
        Ok(into_stream(rx, |message| HostSignal {
            guest_id: message.from().to_string(),
            message,
        }))
    }
}
