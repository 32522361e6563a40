//! In-process transport with synchronous delivery.
//!
//! [`MemoryLink`] is one end of a duplex pipe. [`MemoryConnector`] plays the
//! initiator's reconnecting socket: the client end is stable, so its handler
//! table survives physical reconnects, while every (re)connect produces a
//! brand-new server end with a fresh [`LinkId`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use super::{Acceptor, EventRouter, Link, WireHandler};
use crate::ids::LinkId;
use crate::wire;

/// One end of an in-memory duplex link.
pub struct MemoryLink {
    id: LinkId,
    router: EventRouter,
    peer: Mutex<Option<Weak<MemoryLink>>>,
}

impl MemoryLink {
    /// Create a detached link end.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: LinkId::new(),
            router: EventRouter::new(),
            peer: Mutex::new(None),
        })
    }

    /// Join two ends so that emits on one dispatch on the other.
    pub fn attach(a: &Arc<Self>, b: &Arc<Self>) {
        *a.peer.lock() = Some(Arc::downgrade(b));
        *b.peer.lock() = Some(Arc::downgrade(a));
    }

    /// Detach this end and its peer.
    pub fn sever(&self) {
        let peer = self.peer.lock().take().and_then(|w| w.upgrade());
        if let Some(peer) = peer {
            let _ = peer.peer.lock().take();
        }
    }

    /// Whether the peer end is still attached.
    pub fn is_connected(&self) -> bool {
        self.peer
            .lock()
            .as_ref()
            .is_some_and(|w| w.strong_count() > 0)
    }

    /// Dispatch an event locally, as a transport does for lifecycle events.
    pub fn inject(&self, event: &str, data: Value) -> bool {
        self.router.dispatch(event, data)
    }

    /// The handler table of this end.
    pub fn router(&self) -> &EventRouter {
        &self.router
    }
}

impl Link for MemoryLink {
    fn id(&self) -> &LinkId {
        &self.id
    }

    fn emit(&self, event: &str, data: Value) -> bool {
        let peer = self.peer.lock().as_ref().and_then(Weak::upgrade);
        match peer {
            Some(peer) => {
                let _ = peer.router.dispatch(event, data);
                true
            }
            None => false,
        }
    }

    fn on(&self, event: &str, handler: WireHandler) {
        self.router.on(event, handler);
    }

    fn off(&self, event: &str) {
        self.router.off(event);
    }
}

/// Drives a stable client end through connect / drop / reconnect cycles.
pub struct MemoryConnector {
    client: Arc<MemoryLink>,
    server: Mutex<Option<Arc<MemoryLink>>>,
    connected_once: AtomicBool,
}

impl MemoryConnector {
    /// Create a connector with a detached client end.
    pub fn new() -> Self {
        Self {
            client: MemoryLink::new(),
            server: Mutex::new(None),
            connected_once: AtomicBool::new(false),
        }
    }

    /// The stable client end.
    pub fn client_link(&self) -> Arc<MemoryLink> {
        self.client.clone()
    }

    /// The current server end, if connected.
    pub fn server_link(&self) -> Option<Arc<MemoryLink>> {
        self.server.lock().clone()
    }

    /// Establish a new physical link to `acceptor`.
    ///
    /// The client end sees `connect` the first time and `reconnect` after.
    pub fn connect(&self, acceptor: &dyn Acceptor) -> Arc<MemoryLink> {
        let server = MemoryLink::new();
        MemoryLink::attach(&self.client, &server);
        *self.server.lock() = Some(server.clone());
        acceptor.accept(server.clone());

        let event = if self.connected_once.swap(true, Ordering::SeqCst) {
            wire::RECONNECT
        } else {
            wire::CONNECT
        };
        debug!(link_id = %server.id(), event, "memory link established");
        let _ = self.client.inject(event, Value::Null);
        server
    }

    /// Drop the physical link, notifying both ends with `disconnect`.
    pub fn drop_connection(&self, reason: &str) {
        let server = self.server.lock().take();
        self.client.sever();
        if let Some(server) = server {
            debug!(link_id = %server.id(), reason, "memory link dropped");
            let _ = server.inject(wire::DISCONNECT, Value::String(reason.to_owned()));
        }
        let _ = self
            .client
            .inject(wire::DISCONNECT, Value::String(reason.to_owned()));
    }

    /// Report a transport-level failure to the client end.
    pub fn report(&self, event: &str) {
        let _ = self.client.inject(event, Value::Null);
    }
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}
