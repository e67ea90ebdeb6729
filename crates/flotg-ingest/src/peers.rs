use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use flotg_types::events::{PeerRef, ResolvedPeer};

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("peer not found in database: {0:?}")]
    NotFound(PeerRef),

    #[error("peer lookup failed: {0}")]
    Backend(String),
}

/// Looks up the full entity behind the peer reference of an inbound event.
#[async_trait]
pub trait PeerResolver: Send + Sync {
    async fn resolve(&self, peer: PeerRef) -> Result<ResolvedPeer, ResolveError>;
}

/// In-memory peer database, filled from peers observed on the feed.
#[derive(Default)]
pub struct PeerDirectory {
    peers: RwLock<HashMap<PeerRef, ResolvedPeer>>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember `peer`, replacing an earlier entry for the same reference.
    /// Returns the reference it was stored under, or `None` for peers that
    /// have no reference.
    pub async fn insert(&self, peer: ResolvedPeer) -> Option<PeerRef> {
        let key = peer.peer_ref()?;
        self.peers.write().await.insert(key, peer);
        Some(key)
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }
}

#[async_trait]
impl PeerResolver for PeerDirectory {
    async fn resolve(&self, peer: PeerRef) -> Result<ResolvedPeer, ResolveError> {
        self.peers
            .read()
            .await
            .get(&peer)
            .cloned()
            .ok_or(ResolveError::NotFound(peer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_what_was_inserted() {
        let directory = PeerDirectory::new();
        let channel = ResolvedPeer::Channel {
            id: 42,
            title: "News".into(),
            username: None,
        };

        assert_eq!(directory.insert(channel.clone()).await, Some(PeerRef::Channel(42)));
        assert_eq!(directory.insert(ResolvedPeer::Unknown).await, None);
        assert_eq!(directory.len().await, 1);

        assert_eq!(directory.resolve(PeerRef::Channel(42)).await.unwrap(), channel);
        assert!(matches!(
            directory.resolve(PeerRef::User(42)).await,
            Err(ResolveError::NotFound(PeerRef::User(42)))
        ));
    }

    #[tokio::test]
    async fn later_entries_replace_earlier_ones() {
        let directory = PeerDirectory::new();
        directory
            .insert(ResolvedPeer::Chat { id: 1, title: "old".into() })
            .await;
        directory
            .insert(ResolvedPeer::Chat { id: 1, title: "new".into() })
            .await;

        match directory.resolve(PeerRef::Chat(1)).await.unwrap() {
            ResolvedPeer::Chat { title, .. } => assert_eq!(title, "new"),
            other => panic!("unexpected peer {other:?}"),
        }
    }
}
