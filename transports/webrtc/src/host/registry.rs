//! Guest registry for the host

use crate::peer::{ConnectionId, ConnectionState, PeerConnection};
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Snapshot of one guest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestInfo {
    /// Guest identity
    pub guest_id: String,

    /// Connection state
    pub state: ConnectionState,

    /// Data channel is open
    pub channel_ready: bool,

    /// Time since the transport reported connected
    pub connected_for: Option<Duration>,

    /// Time since the guest last sent anything over the data channel
    pub idle_for: Duration,
}

struct GuestEntry {
    peer: Arc<PeerConnection>,
    connected_at: Option<Instant>,
    last_seen: Instant,
}

/// Map of guest identity to its host-side connection
///
/// At most one connection per guest; inserting replaces.
#[derive(Clone, Default)]
pub struct GuestRegistry {
    guests: Arc<RwLock<HashMap<String, GuestEntry>>>,
}

impl GuestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `peer` for `guest_id`, returning the connection it replaced
    pub async fn insert(
        &self,
        guest_id: String,
        peer: Arc<PeerConnection>,
    ) -> Option<Arc<PeerConnection>> {
        let entry = GuestEntry {
            peer,
            connected_at: None,
            last_seen: Instant::now(),
        };
        info!("Registering guest {}", guest_id);
        self.guests
            .write()
            .await
            .insert(guest_id, entry)
            .map(|old| old.peer)
    }

    /// Remove and close the guest's connection
    ///
    /// # Errors
    ///
    /// Returns [`Error::PeerNotFound`] if the guest is not registered.
    pub async fn remove(&self, guest_id: &str) -> Result<()> {
        let entry = self.guests.write().await.remove(guest_id);
        match entry {
            Some(entry) => {
                info!("Removing guest {}", guest_id);
                entry.peer.close().await;
                Ok(())
            }
            None => Err(Error::PeerNotFound(guest_id.to_string())),
        }
    }

    /// Remove the guest only if it is still served by `connection_id`
    pub async fn remove_connection(&self, guest_id: &str, connection_id: ConnectionId) -> bool {
        let entry = {
            let mut guests = self.guests.write().await;
            match guests.get(guest_id) {
                Some(entry) if entry.peer.connection_id() == connection_id => {
                    guests.remove(guest_id)
                }
                _ => None,
            }
        };

        match entry {
            Some(entry) => {
                info!("Removing guest {} (connection {})", guest_id, connection_id);
                entry.peer.close().await;
                true
            }
            None => false,
        }
    }

    pub async fn get(&self, guest_id: &str) -> Result<Arc<PeerConnection>> {
        self.guests
            .read()
            .await
            .get(guest_id)
            .map(|entry| Arc::clone(&entry.peer))
            .ok_or_else(|| Error::PeerNotFound(guest_id.to_string()))
    }

    /// Guest served by `connection_id`, if it is still registered
    pub async fn find_connection(&self, connection_id: ConnectionId) -> Option<String> {
        self.guests
            .read()
            .await
            .iter()
            .find(|(_, entry)| entry.peer.connection_id() == connection_id)
            .map(|(guest_id, _)| guest_id.clone())
    }

    pub async fn mark_connected(&self, guest_id: &str) {
        if let Some(entry) = self.guests.write().await.get_mut(guest_id) {
            entry.connected_at.get_or_insert_with(Instant::now);
        }
    }

    pub async fn touch(&self, guest_id: &str) {
        if let Some(entry) = self.guests.write().await.get_mut(guest_id) {
            entry.last_seen = Instant::now();
        }
    }

    /// Every registered guest
    pub async fn list(&self) -> Vec<GuestInfo> {
        let guests = self.guests.read().await;
        let mut list: Vec<GuestInfo> = guests
            .iter()
            .map(|(guest_id, entry)| GuestInfo {
                guest_id: guest_id.clone(),
                state: entry.peer.state(),
                channel_ready: entry.peer.is_channel_open(),
                connected_for: entry.connected_at.map(|at| at.elapsed()),
                idle_for: entry.last_seen.elapsed(),
            })
            .collect();
        list.sort_by(|a, b| a.guest_id.cmp(&b.guest_id));
        list
    }

    /// Every registered connection, ready or not
    pub async fn peers(&self) -> Vec<(String, Arc<PeerConnection>)> {
        self.guests
            .read()
            .await
            .iter()
            .map(|(guest_id, entry)| (guest_id.clone(), Arc::clone(&entry.peer)))
            .collect()
    }

    pub async fn count(&self) -> usize {
        self.guests.read().await.len()
    }

    pub async fn contains(&self, guest_id: &str) -> bool {
        self.guests.read().await.contains_key(guest_id)
    }

    /// Remove every guest and close its connection, returning their ids
    pub async fn clear(&self) -> Vec<String> {
        let drained: Vec<(String, GuestEntry)> = self.guests.write().await.drain().collect();
        debug!("Clearing {} guests", drained.len());

        let mut ids = Vec::with_capacity(drained.len());
        for (guest_id, entry) in drained {
            entry.peer.close().await;
            ids.push(guest_id);
        }
        ids
    }
}
