//! Initiator-role session manager.
//!
//! Owns one stable link, a self-generated [`SessionIdentity`], and a
//! channel-number counter starting at 0. Transport lifecycle events drive a
//! grace timer and the reconnect challenge; everything worth surfacing to the
//! host application goes through a single lifecycle callback.
//!
//! Channel opens that cannot be delivered while the link is down are kept
//! and sent on the next `connect`, or after the challenge on `reconnect`.

use std::fmt;
use std::sync::{Arc, Weak};

use muxline_core::wire::{self, ChannelOpen, ChannelRejected, RejectReason};
use muxline_core::{ChannelNumber, Link, Payload, SessionIdentity, WireHandler};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::channel::Channel;
use crate::config::ManagerConfig;
use crate::errors::{Result, SessionError};
use crate::session::{Session, spawn_grace_timer};

/// Transitions reported to the lifecycle callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// Authentication succeeded.
    Connected,
    /// The transport dropped; the grace timer is running.
    Disconnect,
    /// The transport came back; a challenge was sent if the session is alive.
    Reconnect,
    /// The server no longer knows this session.
    ChallengeFailed,
    /// The first connection attempt failed.
    ConnectError,
    /// The first connection attempt timed out.
    ConnectTimeout,
    /// A reconnection attempt failed.
    ReconnectError,
    /// The transport gave up reconnecting.
    ReconnectFailed,
    /// The server refused a channel open.
    ConnectionRejected,
}

impl LifecycleEvent {
    /// Literal event name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnect => wire::DISCONNECT,
            Self::Reconnect => wire::RECONNECT,
            Self::ChallengeFailed => wire::CHALLENGE_FAILED,
            Self::ConnectError => wire::CONNECT_ERROR,
            Self::ConnectTimeout => wire::CONNECT_TIMEOUT,
            Self::ReconnectError => wire::RECONNECT_ERROR,
            Self::ReconnectFailed => wire::RECONNECT_FAILED,
            Self::ConnectionRejected => wire::CONNECTION_REJECTED,
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Host callback for lifecycle transitions.
pub type LifecycleCallback = Arc<dyn Fn(LifecycleEvent) + Send + Sync>;

struct ClientState {
    identity: SessionIdentity,
    session: Arc<Session>,
    next_number: ChannelNumber,
    active: Option<Arc<Channel>>,
    expired: bool,
    unsent: Vec<ChannelOpen>,
}

struct ClientInner {
    config: ManagerConfig,
    link: Arc<dyn Link>,
    state: Mutex<ClientState>,
    lifecycle: RwLock<LifecycleCallback>,
    tasks: TaskTracker,
}

/// Client-side session manager. Cheap to clone.
#[derive(Clone)]
pub struct ClientManager {
    inner: Arc<ClientInner>,
}

impl ClientManager {
    /// Wrap `link` with a freshly generated identity.
    pub fn new(link: Arc<dyn Link>, config: ManagerConfig) -> Self {
        Self::with_identity(link, config, SessionIdentity::generate())
    }

    /// Wrap `link` using a known identity.
    pub fn with_identity(
        link: Arc<dyn Link>,
        config: ManagerConfig,
        identity: SessionIdentity,
    ) -> Self {
        let session = Session::new(link.clone(), false, config.codec, config.max_channels);
        let inner = Arc::new(ClientInner {
            config,
            link,
            state: Mutex::new(ClientState {
                identity,
                session,
                next_number: ChannelNumber(0),
                active: None,
                expired: false,
                unsent: Vec::new(),
            }),
            lifecycle: RwLock::new(Arc::new(|_| {})),
            tasks: TaskTracker::new(),
        });
        ClientInner::wire_transport(&inner);
        Self { inner }
    }

    /// The current session identity.
    pub fn identity(&self) -> SessionIdentity {
        self.inner.state.lock().identity.clone()
    }

    /// The local session.
    pub fn session(&self) -> Arc<Session> {
        self.inner.state.lock().session.clone()
    }

    /// The most recently opened channel.
    pub fn active_channel(&self) -> Option<Arc<Channel>> {
        self.inner.state.lock().active.clone()
    }

    /// Channel opens waiting for the link to come up.
    pub fn unsent_opens(&self) -> usize {
        self.inner.state.lock().unsent.len()
    }

    /// Whether the grace period elapsed or the server refused the challenge.
    pub fn is_expired(&self) -> bool {
        self.inner.state.lock().expired
    }

    /// Replace the lifecycle callback.
    pub fn on_lifecycle<F>(&self, callback: F)
    where
        F: Fn(LifecycleEvent) + Send + Sync + 'static,
    {
        *self.inner.lifecycle.write() = Arc::new(callback);
    }

    /// Send `token` and deliver the server's reply to `callback` once.
    ///
    /// A reply equal to `"success"` also reports [`LifecycleEvent::Connected`].
    pub fn authenticate<F>(&self, token: &str, callback: F) -> bool
    where
        F: FnOnce(Value) + Send + 'static,
    {
        let callback = Mutex::new(Some(callback));
        let weak = Arc::downgrade(&self.inner);
        let handler: WireHandler = Arc::new(move |reply: Value| {
            let Some(callback) = callback.lock().take() else {
                return;
            };
            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.link.off(wire::AUTHENTICATION);
            let success = reply.as_str() == Some(wire::AUTH_SUCCESS);
            if success {
                inner.state.lock().session.set_authenticated();
            }
            callback(reply);
            if success {
                inner.notify(LifecycleEvent::Connected);
            }
        });
        self.inner.link.on(wire::AUTHENTICATION, handler);
        self.inner
            .link
            .emit(wire::AUTHENTICATION, Value::String(token.to_owned()))
    }

    /// Open the next channel named `name` and announce it to the server.
    ///
    /// The new channel becomes the active one. When the link is down the
    /// open is kept and sent once it connects. Fails once the session has
    /// expired; call [`ClientManager::renew`] to start over.
    pub fn open_channel(&self, name: &str) -> Result<Arc<Channel>> {
        let (channel, open) = {
            let mut state = self.inner.state.lock();
            if state.expired {
                return Err(SessionError::TornDown);
            }
            let number = state.next_number;
            let channel = state.session.open_channel(name, number)?;
            state.next_number = number.next();
            state.active = Some(channel.clone());
            let open = ChannelOpen {
                name: name.to_owned(),
                number,
                id: state.identity.clone(),
            };
            // Queued before sending so a connect racing this call replays it.
            state.unsent.push(open.clone());
            (channel, open)
        };
        match self.inner.send_open(&open) {
            Ok(true) => self.inner.forget_unsent(open.number),
            Ok(false) => debug!(
                name = %open.name,
                number = %open.number,
                "link down, channel open deferred"
            ),
            Err(error) => {
                self.inner.forget_unsent(open.number);
                return Err(error);
            }
        }
        Ok(channel)
    }

    /// Re-send the channel-open for `channel`, e.g. after authenticating.
    pub fn resend_open(&self, channel: &Channel) -> Result<bool> {
        let open = ChannelOpen {
            name: channel.name().to_owned(),
            number: channel.number(),
            id: self.identity(),
        };
        self.inner.send_open(&open)
    }

    /// Start a new logical session with a fresh identity.
    ///
    /// The previous session is closed without firing handlers and the
    /// channel counter restarts at 0.
    pub fn renew(&self) -> SessionIdentity {
        let identity = SessionIdentity::generate();
        let old = {
            let mut state = self.inner.state.lock();
            let session = Session::new(
                self.inner.link.clone(),
                false,
                self.inner.config.codec,
                self.inner.config.max_channels,
            );
            let old = std::mem::replace(&mut state.session, session);
            state.identity = identity.clone();
            state.next_number = ChannelNumber(0);
            state.active = None;
            state.expired = false;
            state.unsent.clear();
            old
        };
        old.close();
        info!(%identity, "session renewed");
        identity
    }
}

impl ClientInner {
    fn wire_transport(inner: &Arc<Self>) {
        let weak = Arc::downgrade(inner);
        inner.link.on(
            wire::CONNECT,
            handler(&weak, |inner, _| inner.flush_unsent()),
        );
        inner.link.on(
            wire::DISCONNECT,
            handler(&weak, |inner, reason| inner.handle_disconnect(&reason)),
        );
        inner.link.on(
            wire::RECONNECT,
            handler(&weak, |inner, _| inner.handle_reconnect()),
        );
        inner.link.on(
            wire::CHALLENGE_FAILED,
            handler(&weak, |inner, _| inner.handle_challenge_failed()),
        );
        inner.link.on(
            wire::CONNECTION_REJECTED,
            handler(&weak, |inner, body| inner.handle_rejected(&body)),
        );
        for (event, lifecycle) in [
            (wire::CONNECT_ERROR, LifecycleEvent::ConnectError),
            (wire::CONNECT_TIMEOUT, LifecycleEvent::ConnectTimeout),
            (wire::RECONNECT_ERROR, LifecycleEvent::ReconnectError),
            (wire::RECONNECT_FAILED, LifecycleEvent::ReconnectFailed),
        ] {
            inner.link.on(
                event,
                handler(&weak, move |inner, _| {
                    debug!(event, "transport event");
                    inner.notify(lifecycle);
                }),
            );
        }
    }

    fn notify(&self, event: LifecycleEvent) {
        let callback = self.lifecycle.read().clone();
        callback(event);
    }

    fn send_open(&self, open: &ChannelOpen) -> Result<bool> {
        let value = open.to_wire()?;
        debug!(name = %open.name, number = %open.number, identity = %open.id, "channel open sent");
        Ok(self.link.emit(wire::CONNECTION, value))
    }

    fn forget_unsent(&self, number: ChannelNumber) {
        self.state.lock().unsent.retain(|o| o.number != number);
    }

    /// Send every deferred open, keeping the ones the link still refuses.
    fn flush_unsent(&self) {
        let pending = {
            let mut state = self.state.lock();
            if state.expired {
                state.unsent.clear();
                return;
            }
            std::mem::take(&mut state.unsent)
        };
        if pending.is_empty() {
            return;
        }
        debug!(count = pending.len(), "sending deferred channel opens");
        let mut refused = Vec::new();
        for open in pending {
            match self.send_open(&open) {
                Ok(true) => {}
                Ok(false) => refused.push(open),
                Err(error) => warn!(%error, name = %open.name, "deferred channel open dropped"),
            }
        }
        if !refused.is_empty() {
            let mut state = self.state.lock();
            refused.append(&mut state.unsent);
            state.unsent = refused;
        }
    }

    fn handle_disconnect(self: &Arc<Self>, reason: &Value) {
        info!(%reason, "disconnect close-timer start");
        let session = self.state.lock().session.clone();
        let weak = Arc::downgrade(self);
        let expired = session.clone();
        let tasks = &self.tasks;
        let _ = spawn_grace_timer(&session, self.config.grace_period, tasks, move |channels| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.expire(&expired, channels);
        });
        self.notify(LifecycleEvent::Disconnect);
    }

    fn expire(&self, session: &Arc<Session>, channels: Vec<Arc<Channel>>) {
        let (active, identity) = {
            let mut state = self.state.lock();
            if !Arc::ptr_eq(&state.session, session) {
                return;
            }
            state.expired = true;
            state.unsent.clear();
            (state.active.take(), state.identity.clone())
        };
        if let Some(active) = active {
            let _ = active.fire(wire::DISCONNECT, Payload::Null);
        }
        let link = session.link();
        for channel in channels {
            channel.detach(link.as_ref());
        }
        info!(%identity, "session expired");
    }

    fn handle_reconnect(&self) {
        let (session, identity, expired) = {
            let state = self.state.lock();
            (state.session.clone(), state.identity.clone(), state.expired)
        };
        self.notify(LifecycleEvent::Reconnect);
        if expired {
            debug!(%identity, "session already expired, challenge skipped");
            self.notify(LifecycleEvent::ChallengeFailed);
            return;
        }
        if session.cancel_grace() {
            debug!("disconnect close-timer canceled");
        }
        info!(%identity, "challenge reconnect");
        let _ = self
            .link
            .emit(wire::CHALLENGE_RECONNECT, Value::String(identity.into_inner()));
        // after the challenge, so the opens land on the rebound session
        self.flush_unsent();
    }

    fn handle_challenge_failed(&self) {
        let session = {
            let mut state = self.state.lock();
            state.expired = true;
            state.active = None;
            state.unsent.clear();
            state.session.clone()
        };
        session.close();
        warn!("reconnect challenge failed, session lost");
        self.notify(LifecycleEvent::ChallengeFailed);
    }

    fn handle_rejected(&self, body: &Value) {
        match serde_json::from_value::<ChannelRejected>(body.clone()) {
            Ok(rejected) => {
                let session = {
                    let mut state = self.state.lock();
                    let local = state.session.channel(rejected.number);
                    if rejected.reason == RejectReason::DuplicateNumber
                        && local.is_some_and(|c| c.name() == rejected.name)
                    {
                        // a re-sent open the server had already accepted
                        debug!(
                            name = %rejected.name,
                            number = %rejected.number,
                            "duplicate open of a live channel ignored"
                        );
                        return;
                    }
                    if state
                        .active
                        .as_ref()
                        .is_some_and(|c| c.number() == rejected.number)
                    {
                        state.active = None;
                    }
                    state.unsent.retain(|o| o.number != rejected.number);
                    state.session.clone()
                };
                let _ = session.remove_channel(rejected.number);
                warn!(
                    name = %rejected.name,
                    number = %rejected.number,
                    reason = rejected.reason.as_str(),
                    "channel open rejected"
                );
            }
            Err(error) => warn!(%error, "malformed channel rejection"),
        }
        self.notify(LifecycleEvent::ConnectionRejected);
    }
}

fn handler<F>(inner: &Weak<ClientInner>, f: F) -> WireHandler
where
    F: Fn(&Arc<ClientInner>, Value) + Send + Sync + 'static,
{
    let inner = inner.clone();
    Arc::new(move |value| {
        if let Some(inner) = inner.upgrade() {
            f(&inner, value);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use muxline_core::transport::memory::MemoryLink;
    use serde_json::json;

    fn client() -> (Arc<MemoryLink>, Arc<MemoryLink>, ClientManager) {
        let local = MemoryLink::new();
        let remote = MemoryLink::new();
        MemoryLink::attach(&local, &remote);
        let manager = ClientManager::with_identity(
            local.clone(),
            ManagerConfig::default(),
            SessionIdentity::from("ab12cd34"),
        );
        (local, remote, manager)
    }

    fn record(manager: &ClientManager) -> Arc<Mutex<Vec<LifecycleEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        manager.on_lifecycle(move |e| sink.lock().push(e));
        events
    }

    #[test]
    fn lifecycle_names_are_literal() {
        assert_eq!(LifecycleEvent::Connected.as_str(), "connected");
        assert_eq!(LifecycleEvent::ConnectTimeout.to_string(), "connect_timeout");
        assert_eq!(LifecycleEvent::ChallengeFailed.as_str(), "challenge_failed");
    }

    #[test]
    fn generated_identity_has_expected_shape() {
        let link = MemoryLink::new();
        let manager = ClientManager::new(link, ManagerConfig::default());
        assert_eq!(manager.identity().as_str().len(), 8);
    }

    #[test]
    fn open_channel_sends_open_and_counts_from_zero() {
        let (_local, remote, manager) = client();
        let opens = Arc::new(Mutex::new(Vec::new()));
        let sink = opens.clone();
        remote.on(wire::CONNECTION, Arc::new(move |v| sink.lock().push(v)));

        let chat = manager.open_channel("chat").unwrap();
        let term = manager.open_channel("term").unwrap();
        assert_eq!(chat.number(), ChannelNumber(0));
        assert_eq!(term.number(), ChannelNumber(1));
        assert_eq!(manager.active_channel().unwrap().name(), "term");

        let first = ChannelOpen::from_wire(&opens.lock()[0]).unwrap();
        assert_eq!(first.name, "chat");
        assert_eq!(first.number, ChannelNumber(0));
        assert_eq!(first.id.as_str(), "ab12cd34");
    }

    #[test]
    fn authenticate_success_reports_connected_once() {
        let (local, remote, manager) = client();
        let events = record(&manager);
        let replies = Arc::new(Mutex::new(Vec::new()));
        let sink = replies.clone();
        let echo = Arc::downgrade(&remote);
        remote.on(
            wire::AUTHENTICATION,
            Arc::new(move |token| {
                assert_eq!(token, json!("s3cret"));
                if let Some(remote) = echo.upgrade() {
                    let _ = remote.emit(wire::AUTHENTICATION, json!("success"));
                }
            }),
        );

        assert!(manager.authenticate("s3cret", move |reply| sink.lock().push(reply)));
        assert_eq!(*replies.lock(), vec![json!("success")]);
        assert_eq!(*events.lock(), vec![LifecycleEvent::Connected]);
        assert!(!local.router().has_handler(wire::AUTHENTICATION));
        assert!(manager.session().is_authenticated());
    }

    #[test]
    fn authenticate_failure_forwards_reply_only() {
        let (_local, remote, manager) = client();
        let events = record(&manager);
        let replies = Arc::new(Mutex::new(Vec::new()));
        let sink = replies.clone();
        let echo = Arc::downgrade(&remote);
        remote.on(
            wire::AUTHENTICATION,
            Arc::new(move |_| {
                if let Some(remote) = echo.upgrade() {
                    let _ = remote.emit(wire::AUTHENTICATION, json!("unauthorized"));
                }
            }),
        );
        let _ = manager.authenticate("nope", move |reply| sink.lock().push(reply));
        assert_eq!(*replies.lock(), vec![json!("unauthorized")]);
        assert!(events.lock().is_empty());
    }

    #[test]
    fn transport_errors_reach_lifecycle() {
        let (local, _remote, manager) = client();
        let events = record(&manager);
        for event in [
            wire::CONNECT_ERROR,
            wire::CONNECT_TIMEOUT,
            wire::RECONNECT_ERROR,
            wire::RECONNECT_FAILED,
        ] {
            let _ = local.inject(event, Value::Null);
        }
        assert_eq!(
            *events.lock(),
            vec![
                LifecycleEvent::ConnectError,
                LifecycleEvent::ConnectTimeout,
                LifecycleEvent::ReconnectError,
                LifecycleEvent::ReconnectFailed,
            ]
        );
    }

    #[test]
    fn reconnect_sends_challenge() {
        let (local, remote, manager) = client();
        let challenges = Arc::new(Mutex::new(Vec::new()));
        let sink = challenges.clone();
        remote.on(wire::CHALLENGE_RECONNECT, Arc::new(move |v| sink.lock().push(v)));
        let events = record(&manager);

        let _ = local.inject(wire::RECONNECT, Value::Null);
        assert_eq!(*challenges.lock(), vec![json!("ab12cd34")]);
        assert_eq!(*events.lock(), vec![LifecycleEvent::Reconnect]);
    }

    #[test]
    fn challenge_failed_marks_expired() {
        let (local, _remote, manager) = client();
        let chat = manager.open_channel("chat").unwrap();
        chat.on("message", |_| {}).unwrap();
        let events = record(&manager);

        let _ = local.inject(wire::CHALLENGE_FAILED, json!("ab12cd34"));
        assert!(manager.is_expired());
        assert!(manager.active_channel().is_none());
        assert!(!local.router().has_handler("message_0"));
        assert_eq!(*events.lock(), vec![LifecycleEvent::ChallengeFailed]);
        assert!(matches!(
            manager.open_channel("again"),
            Err(SessionError::TornDown)
        ));
    }

    #[test]
    fn renew_starts_fresh_session() {
        let (local, _remote, manager) = client();
        let _ = manager.open_channel("chat").unwrap();
        let _ = local.inject(wire::CHALLENGE_FAILED, Value::Null);

        let identity = manager.renew();
        assert_ne!(identity.as_str(), "ab12cd34");
        assert!(!manager.is_expired());
        let chat = manager.open_channel("chat").unwrap();
        assert_eq!(chat.number(), ChannelNumber(0));
    }

    #[test]
    fn rejection_removes_local_channel() {
        let (local, _remote, manager) = client();
        let chat = manager.open_channel("chat").unwrap();
        chat.on("message", |_| {}).unwrap();
        let events = record(&manager);

        let _ = local.inject(
            wire::CONNECTION_REJECTED,
            json!({"name": "chat", "number": 0, "reason": "channel_limit"}),
        );
        assert!(manager.session().channel(ChannelNumber(0)).is_none());
        assert!(manager.active_channel().is_none());
        assert!(!local.router().has_handler("message_0"));
        assert_eq!(*events.lock(), vec![LifecycleEvent::ConnectionRejected]);
    }

    #[test]
    fn duplicate_of_live_channel_is_ignored() {
        let (local, _remote, manager) = client();
        let chat = manager.open_channel("chat").unwrap();
        chat.on("message", |_| {}).unwrap();
        let events = record(&manager);

        let _ = local.inject(
            wire::CONNECTION_REJECTED,
            json!({"name": "chat", "number": 0, "reason": "duplicate_number"}),
        );
        assert!(manager.session().channel(ChannelNumber(0)).is_some());
        assert_eq!(manager.active_channel().unwrap().name(), "chat");
        assert!(local.router().has_handler("message_0"));
        assert!(events.lock().is_empty());
    }

    #[test]
    fn duplicate_under_another_name_removes_channel() {
        let (local, _remote, manager) = client();
        let _ = manager.open_channel("chat").unwrap();
        let events = record(&manager);

        let _ = local.inject(
            wire::CONNECTION_REJECTED,
            json!({"name": "term", "number": 0, "reason": "duplicate_number"}),
        );
        assert!(manager.session().channel(ChannelNumber(0)).is_none());
        assert_eq!(*events.lock(), vec![LifecycleEvent::ConnectionRejected]);
    }

    #[test]
    fn open_while_detached_is_sent_on_connect() {
        let local = MemoryLink::new();
        let manager = ClientManager::with_identity(
            local.clone(),
            ManagerConfig::default(),
            SessionIdentity::from("ab12cd34"),
        );
        let chat = manager.open_channel("chat").unwrap();
        let term = manager.open_channel("term").unwrap();
        assert_eq!(manager.unsent_opens(), 2);

        let remote = MemoryLink::new();
        let opens = Arc::new(Mutex::new(Vec::new()));
        let sink = opens.clone();
        remote.on(wire::CONNECTION, Arc::new(move |v| sink.lock().push(v)));
        MemoryLink::attach(&local, &remote);
        let _ = local.inject(wire::CONNECT, Value::Null);

        let sent: Vec<_> = opens
            .lock()
            .iter()
            .map(|v| ChannelOpen::from_wire(v).unwrap())
            .collect();
        assert_eq!(sent.len(), 2);
        assert_eq!((sent[0].name.as_str(), sent[0].number), ("chat", chat.number()));
        assert_eq!((sent[1].name.as_str(), sent[1].number), ("term", term.number()));
        assert_eq!(manager.unsent_opens(), 0);

        let _ = local.inject(wire::CONNECT, Value::Null);
        assert_eq!(opens.lock().len(), 2);
    }

    #[test]
    fn deferred_open_follows_reconnect_challenge() {
        let local = MemoryLink::new();
        let manager = ClientManager::with_identity(
            local.clone(),
            ManagerConfig::default(),
            SessionIdentity::from("ab12cd34"),
        );
        let _ = manager.open_channel("chat").unwrap();

        let remote = MemoryLink::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for event in [wire::CHALLENGE_RECONNECT, wire::CONNECTION] {
            let sink = order.clone();
            remote.on(event, Arc::new(move |_| sink.lock().push(event)));
        }
        MemoryLink::attach(&local, &remote);
        let _ = local.inject(wire::RECONNECT, Value::Null);

        assert_eq!(
            *order.lock(),
            vec![wire::CHALLENGE_RECONNECT, wire::CONNECTION]
        );
        assert_eq!(manager.unsent_opens(), 0);
    }

    #[test]
    fn challenge_failure_drops_deferred_opens() {
        let local = MemoryLink::new();
        let manager = ClientManager::new(local.clone(), ManagerConfig::default());
        let _ = manager.open_channel("chat").unwrap();
        assert_eq!(manager.unsent_opens(), 1);

        let _ = local.inject(wire::CHALLENGE_FAILED, Value::Null);
        assert_eq!(manager.unsent_opens(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn grace_expiry_fires_active_disconnect() {
        let (local, _remote, manager) = client();
        let first = manager.open_channel("first").unwrap();
        let active = manager.open_channel("second").unwrap();
        let fired = Arc::new(Mutex::new(Vec::new()));
        let sink = fired.clone();
        first
            .on(wire::DISCONNECT, move |_| sink.lock().push("first"))
            .unwrap();
        let sink = fired.clone();
        active
            .on(wire::DISCONNECT, move |_| sink.lock().push("second"))
            .unwrap();
        let events = record(&manager);

        let _ = local.inject(wire::DISCONNECT, json!("transport close"));
        tokio::time::sleep(std::time::Duration::from_secs(31)).await;

        assert_eq!(*fired.lock(), vec!["second"]);
        assert!(manager.is_expired());
        let channel_events = local
            .router()
            .events()
            .into_iter()
            .filter(|e| e.ends_with("_0") || e.ends_with("_1"))
            .count();
        assert_eq!(channel_events, 0);
        assert_eq!(*events.lock(), vec![LifecycleEvent::Disconnect]);

        let _ = local.inject(wire::RECONNECT, Value::Null);
        assert_eq!(
            *events.lock(),
            vec![
                LifecycleEvent::Disconnect,
                LifecycleEvent::Reconnect,
                LifecycleEvent::ChallengeFailed
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_within_grace_keeps_session() {
        let (local, _remote, manager) = client();
        let chat = manager.open_channel("chat").unwrap();
        chat.on("message", |_| {}).unwrap();

        let _ = local.inject(wire::DISCONNECT, json!("transport close"));
        tokio::time::sleep(std::time::Duration::from_secs(10)).await;
        let _ = local.inject(wire::RECONNECT, Value::Null);
        tokio::time::sleep(std::time::Duration::from_secs(60)).await;

        assert!(!manager.is_expired());
        assert!(local.router().has_handler("message_0"));
    }
}
