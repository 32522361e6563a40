//! A named logical sub-connection multiplexed over its session's link.
//!
//! Logical keys travel as `key_<number>`. Every registration is recorded
//! as (key → wire name, handler, decoding wrapper) so the session can re-arm
//! the exact same wrappers on a replacement link after a reconnect.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

use muxline_core::wire::{self, is_reserved_key, wire_name};
use muxline_core::{ChannelNumber, Codec, Link, Payload, WireHandler};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::errors::ChannelError;
use crate::session::Session;

/// A handler for decoded channel payloads.
pub type PayloadHandler = Arc<dyn Fn(Payload) + Send + Sync>;

struct Registration {
    wire_name: String,
    handler: PayloadHandler,
    wrapper: WireHandler,
}

/// One logical channel.
pub struct Channel {
    name: String,
    number: ChannelNumber,
    session: Weak<Session>,
    codec: Codec,
    handlers: Mutex<BTreeMap<String, Registration>>,
}

impl Channel {
    pub(crate) fn new(
        session: &Arc<Session>,
        name: String,
        number: ChannelNumber,
        codec: Codec,
    ) -> Arc<Self> {
        Arc::new(Self {
            name,
            number,
            session: Arc::downgrade(session),
            codec,
            handlers: Mutex::new(BTreeMap::new()),
        })
    }

    /// Channel name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Channel number within its session.
    pub fn number(&self) -> ChannelNumber {
        self.number
    }

    /// The wire event name for a logical key on this channel.
    pub fn event_name(&self, key: &str) -> String {
        wire_name(key, self.number)
    }

    fn session(&self) -> Result<Arc<Session>, ChannelError> {
        self.session.upgrade().ok_or(ChannelError::SessionClosed)
    }

    /// Send a payload under `key`.
    ///
    /// Non-string primitives travel raw; strings and structured values are
    /// compressed. Returns whether the link accepted the message.
    pub fn emit(&self, key: &str, payload: impl Into<Payload>) -> Result<bool, ChannelError> {
        if is_reserved_key(key) {
            return Err(ChannelError::ReservedKey(key.to_owned()));
        }
        let session = self.session()?;
        let value = self.codec.encode(&payload.into())?;
        let event = self.event_name(key);
        trace!(channel = %self.name, event, "emit");
        Ok(session.link().emit(&event, value))
    }

    /// Register `handler` for `key`, replacing any previous handler.
    ///
    /// Received values are decoded; values that were not compressed are
    /// delivered unchanged.
    pub fn on<F>(&self, key: &str, handler: F) -> Result<(), ChannelError>
    where
        F: Fn(Payload) + Send + Sync + 'static,
    {
        if is_reserved_key(key) {
            return Err(ChannelError::ReservedKey(key.to_owned()));
        }
        let handler: PayloadHandler = Arc::new(handler);
        let codec = self.codec;
        let inner = handler.clone();
        let wrapper: WireHandler = Arc::new(move |value| inner(codec.decode(value)));
        let event = self.event_name(key);

        // Hold the table while reading the link so a concurrent rebind either
        // sees this registration or runs before the link is read.
        let mut handlers = self.handlers.lock();
        let session = self.session()?;
        session.link().on(&event, wrapper.clone());
        let _ = handlers.insert(
            key.to_owned(),
            Registration {
                wire_name: event,
                handler,
                wrapper,
            },
        );
        Ok(())
    }

    /// Remove the handler for `key`. Returns whether one was registered.
    pub fn off(&self, key: &str) -> bool {
        let mut handlers = self.handlers.lock();
        let Some(reg) = handlers.remove(key) else {
            return false;
        };
        if let Some(session) = self.session.upgrade() {
            session.link().off(&reg.wire_name);
        }
        true
    }

    /// Whether a handler is registered for `key`.
    pub fn has_handler(&self, key: &str) -> bool {
        self.handlers.lock().contains_key(key)
    }

    /// Number of recorded handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers.lock().len()
    }

    /// Recorded logical keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.handlers.lock().keys().cloned().collect()
    }

    /// Re-apply every recorded wrapper onto `link`.
    pub fn reregister_all(&self, link: &dyn Link) {
        let handlers = self.handlers.lock();
        for reg in handlers.values() {
            link.on(&reg.wire_name, reg.wrapper.clone());
        }
        debug!(
            channel = %self.name,
            number = %self.number,
            handlers = handlers.len(),
            link_id = %link.id(),
            "handlers re-armed"
        );
    }

    /// Remove every recorded wrapper from `link` without forgetting them.
    pub fn unregister_all(&self, link: &dyn Link) {
        for reg in self.handlers.lock().values() {
            link.off(&reg.wire_name);
        }
    }

    /// Invoke the handler recorded for `key` locally. Returns whether one ran.
    pub fn fire(&self, key: &str, payload: Payload) -> bool {
        let handler = self.handlers.lock().get(key).map(|r| r.handler.clone());
        match handler {
            Some(handler) => {
                handler(payload);
                true
            }
            None => false,
        }
    }

    /// Unregister and forget every handler without invoking any.
    pub(crate) fn detach(&self, link: &dyn Link) {
        let drained = std::mem::take(&mut *self.handlers.lock());
        for reg in drained.values() {
            link.off(&reg.wire_name);
        }
    }

    /// Fire the disconnect handler (at most once), then detach.
    pub(crate) fn teardown(&self, link: &dyn Link) {
        let drained = std::mem::take(&mut *self.handlers.lock());
        if let Some(reg) = drained.get(wire::DISCONNECT) {
            (reg.handler)(Payload::Null);
        }
        for reg in drained.values() {
            link.off(&reg.wire_name);
        }
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("number", &self.number)
            .field("keys", &self.keys())
            .finish()
    }
}
