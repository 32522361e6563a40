//! Two indexes over the live sessions: by current link id and by identity.
//!
//! Both maps sit behind one lock so a move between links and a lookup by
//! identity never observe a half-updated pair.

use std::collections::HashMap;
use std::sync::Arc;

use muxline_core::{LinkId, SessionIdentity};
use parking_lot::Mutex;
use tracing::debug;

use crate::session::Session;

#[derive(Default)]
struct Indexes {
    by_link: HashMap<LinkId, Arc<Session>>,
    by_identity: HashMap<SessionIdentity, Arc<Session>>,
}

impl Indexes {
    fn purge_identities(&mut self, session: &Arc<Session>) {
        self.by_identity.retain(|_, s| !Arc::ptr_eq(s, session));
    }
}

/// Session registry owned by a server manager.
#[derive(Default)]
pub struct Registry {
    inner: Mutex<Indexes>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a new session under its link.
    pub fn insert_link(&self, link_id: LinkId, session: Arc<Session>) {
        let _ = self.inner.lock().by_link.insert(link_id, session);
    }

    /// Session currently bound to `link_id`.
    pub fn by_link(&self, link_id: &LinkId) -> Option<Arc<Session>> {
        self.inner.lock().by_link.get(link_id).cloned()
    }

    /// Session registered under `identity`.
    pub fn by_identity(&self, identity: &SessionIdentity) -> Option<Arc<Session>> {
        self.inner.lock().by_identity.get(identity).cloned()
    }

    /// Make `session` reachable by `identity`. A different session holding
    /// the identity is displaced.
    pub fn index_identity(&self, identity: SessionIdentity, session: &Arc<Session>) {
        let mut inner = self.inner.lock();
        if let Some(previous) = inner.by_identity.insert(identity.clone(), session.clone()) {
            if !Arc::ptr_eq(&previous, session) {
                debug!(%identity, "identity re-indexed to a different session");
            }
        }
    }

    /// Re-key `session` from `from` to `to`.
    ///
    /// Returns the session previously indexed under `to`, if it was a
    /// different one; its identity entries are dropped.
    pub fn move_link(
        &self,
        from: &LinkId,
        to: LinkId,
        session: &Arc<Session>,
    ) -> Option<Arc<Session>> {
        let mut inner = self.inner.lock();
        if inner
            .by_link
            .get(from)
            .is_some_and(|s| Arc::ptr_eq(s, session))
        {
            let _ = inner.by_link.remove(from);
        }
        let displaced = inner
            .by_link
            .insert(to, session.clone())
            .filter(|s| !Arc::ptr_eq(s, session));
        if let Some(displaced) = &displaced {
            inner.purge_identities(displaced);
        }
        displaced
    }

    /// Drop every index entry pointing at `session`. Returns whether any
    /// entry was removed.
    pub fn remove_session(&self, session: &Arc<Session>) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.by_link.len() + inner.by_identity.len();
        inner.by_link.retain(|_, s| !Arc::ptr_eq(s, session));
        inner.purge_identities(session);
        before != inner.by_link.len() + inner.by_identity.len()
    }

    /// Number of indexed sessions.
    pub fn session_count(&self) -> usize {
        self.inner.lock().by_link.len()
    }

    /// Number of identities reachable for reconnect.
    pub fn identity_count(&self) -> usize {
        self.inner.lock().by_identity.len()
    }

    /// Snapshot of every indexed session.
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.inner.lock().by_link.values().cloned().collect()
    }
}
