//! Host-side procedure handlers

use crate::channels::{unix_millis, Pong, RpcCall, RpcReply, SongSummary};
use crate::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::warn;

/// Answers the procedures guests call over the data channel
#[async_trait]
pub trait GameRouter: Send + Sync {
    /// Liveness probe; reports the host clock
    async fn ping(&self) -> Result<Pong> {
        Ok(Pong {
            timestamp: unix_millis(),
        })
    }

    /// Every song the host can play
    async fn list_songs(&self) -> Result<Vec<SongSummary>>;
}

/// Run `call` against `router`, turning failures into an error reply
pub async fn dispatch(router: &dyn GameRouter, call: &RpcCall) -> RpcReply {
    let result = match call {
        RpcCall::Ping => router
            .ping()
            .await
            .map(|pong| RpcReply::Pong {
                timestamp: pong.timestamp,
            }),
        RpcCall::SongsList => router.list_songs().await.map(|songs| RpcReply::Songs { songs }),
    };

    result.unwrap_or_else(|e| {
        warn!("{} handler failed: {}", call.method(), e);
        RpcReply::Error {
            message: e.to_string(),
        }
    })
}

/// In-memory song list that can be swapped at runtime
#[derive(Debug, Default)]
pub struct SongCatalog {
    songs: RwLock<Vec<SongSummary>>,
}

impl SongCatalog {
    pub fn new(songs: Vec<SongSummary>) -> Self {
        Self {
            songs: RwLock::new(songs),
        }
    }

    /// Replace the song list
    pub fn set_songs(&self, songs: Vec<SongSummary>) {
        *self.songs.write() = songs;
    }

    pub fn len(&self) -> usize {
        self.songs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.songs.read().is_empty()
    }
}

#[async_trait]
impl GameRouter for SongCatalog {
    async fn list_songs(&self) -> Result<Vec<SongSummary>> {
        Ok(self.songs.read().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    struct Broken;

    #[async_trait]
    impl GameRouter for Broken {
        async fn list_songs(&self) -> Result<Vec<SongSummary>> {
            Err(Error::InternalError("library scan in progress".into()))
        }
    }

    #[tokio::test]
    async fn test_dispatch_songs() {
        let catalog = SongCatalog::new(vec![SongSummary {
            hash: "h1".into(),
            title: "Africa".into(),
            artist: "Toto".into(),
        }]);

        match dispatch(&catalog, &RpcCall::SongsList).await {
            RpcReply::Songs { songs } => assert_eq!(songs[0].title, "Africa"),
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_default_ping_uses_clock() {
        let before = unix_millis();
        match dispatch(&SongCatalog::default(), &RpcCall::Ping).await {
            RpcReply::Pong { timestamp } => assert!(timestamp >= before),
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_handler_error_becomes_error_reply() {
        let reply = dispatch(&Broken, &RpcCall::SongsList).await;
        assert!(matches!(reply, RpcReply::Error { ref message } if message.contains("library scan")));
    }
}
