//! Open server-side links, indexed by link id.

use std::collections::HashMap;
use std::sync::Arc;

use muxline_core::{Link, LinkId};
use tokio::sync::RwLock;
use tracing::debug;

use super::link::WsLink;

/// Every socket currently open on the server.
pub struct LinkTable {
    links: RwLock<HashMap<LinkId, Arc<WsLink>>>,
}

impl LinkTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            links: RwLock::new(HashMap::new()),
        }
    }

    /// Add a link.
    pub async fn add(&self, link: Arc<WsLink>) {
        let mut links = self.links.write().await;
        let _ = links.insert(link.id().clone(), link);
    }

    /// Remove a link by id.
    pub async fn remove(&self, link_id: &LinkId) -> Option<Arc<WsLink>> {
        self.links.write().await.remove(link_id)
    }

    /// Look up a link.
    pub async fn get(&self, link_id: &LinkId) -> Option<Arc<WsLink>> {
        self.links.read().await.get(link_id).cloned()
    }

    /// Number of open links.
    pub async fn count(&self) -> usize {
        self.links.read().await.len()
    }

    /// Ids of every open link.
    pub async fn ids(&self) -> Vec<LinkId> {
        self.links.read().await.keys().cloned().collect()
    }

    /// Ask every open socket to close.
    pub async fn close_all(&self) -> usize {
        let links = self.links.read().await;
        let closed = links.values().filter(|link| link.close()).count();
        debug!(closed, total = links.len(), "closing all links");
        closed
    }
}

impl Default for LinkTable {
    fn default() -> Self {
        Self::new()
    }
}
