//! The physical-link contract every transport binding satisfies.
//!
//! A [`Link`] is one duplex connection with a unique [`LinkId`]. It supports
//! named sends and named handler registration. Transport lifecycle events
//! (`connect`, `disconnect`, `reconnect`, ...) are dispatched through the same
//! handler table under their literal names.

pub mod memory;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::trace;

use crate::ids::LinkId;

/// A handler bound to one wire event name.
pub type WireHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// One physical duplex connection.
pub trait Link: Send + Sync {
    /// Unique identity of this physical connection.
    fn id(&self) -> &LinkId;

    /// Send `data` under the wire event name `event`.
    ///
    /// Returns `false` if the link is down or cannot accept the message.
    fn emit(&self, event: &str, data: Value) -> bool;

    /// Register `handler` for `event`, replacing any previous handler.
    fn on(&self, event: &str, handler: WireHandler);

    /// Remove the handler for `event`, if any.
    fn off(&self, event: &str);
}

/// Receives freshly established physical links (server role).
pub trait Acceptor: Send + Sync {
    /// Take ownership of a new link and wire up its control handlers.
    fn accept(&self, link: Arc<dyn Link>);
}

/// Named handler table embedded by transports.
///
/// At most one handler per event name; registering again replaces. Dispatch
/// clones the handler out before calling it so handlers may register or
/// remove handlers on the same router.
#[derive(Default)]
pub struct EventRouter {
    handlers: Mutex<HashMap<String, WireHandler>>,
}

impl EventRouter {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for `event`.
    pub fn on(&self, event: &str, handler: WireHandler) {
        let _ = self.handlers.lock().insert(event.to_owned(), handler);
    }

    /// Remove the handler for `event`.
    pub fn off(&self, event: &str) {
        let _ = self.handlers.lock().remove(event);
    }

    /// Deliver `data` to the handler for `event`.
    ///
    /// Returns `false` when no handler is registered.
    pub fn dispatch(&self, event: &str, data: Value) -> bool {
        let handler = self.handlers.lock().get(event).cloned();
        match handler {
            Some(handler) => {
                handler(data);
                true
            }
            None => {
                trace!(event, "no handler registered, dropping");
                false
            }
        }
    }

    /// Whether a handler is registered for `event`.
    pub fn has_handler(&self, event: &str) -> bool {
        self.handlers.lock().contains_key(event)
    }

    /// Number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers.lock().len()
    }

    /// Registered event names, sorted.
    pub fn events(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Drop every handler.
    pub fn clear(&self) {
        self.handlers.lock().clear();
    }
}
