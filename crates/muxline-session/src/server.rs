//! Responder-role session manager.
//!
//! Every physical link handed to [`ServerManager::accept`] gets a fresh
//! session and four control handlers (`authentication`, `connection`,
//! `challenge_reconnect`, `disconnect`). Control messages are handled
//! synchronously inside the link's dispatch so a channel-open is fully
//! processed, factory included, before the next message on that link.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use muxline_core::wire::{self, ChannelOpen, ChannelRejected, RejectReason};
use muxline_core::{Acceptor, Link, LinkId, SessionIdentity, WireHandler};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::auth::Authenticator;
use crate::channel::Channel;
use crate::config::ManagerConfig;
use crate::errors::SessionError;
use crate::metrics::{
    CHALLENGES_FAILED_TOTAL, CHANNELS_DROPPED_UNAUTHENTICATED_TOTAL, CHANNELS_OPENED_TOTAL,
    CHANNELS_REJECTED_TOTAL, SESSIONS_ACTIVE, SESSIONS_EXPIRED_TOTAL, SESSIONS_OPENED_TOTAL,
    SESSIONS_REBOUND_TOTAL,
};
use crate::registry::Registry;
use crate::session::{Rebind, Session, spawn_grace_timer};

/// Callback invoked with every newly opened channel of a given name.
pub type ChannelFactory = Arc<dyn Fn(Arc<Channel>) + Send + Sync>;

struct ServerInner {
    config: ManagerConfig,
    registry: Registry,
    factories: Mutex<HashMap<String, ChannelFactory>>,
    authenticator: Option<Arc<dyn Authenticator>>,
    tasks: TaskTracker,
}

/// Server-side session manager. Cheap to clone.
#[derive(Clone)]
pub struct ServerManager {
    inner: Arc<ServerInner>,
}

impl ServerManager {
    /// Create a manager that accepts every client without authentication.
    pub fn new(config: ManagerConfig) -> Self {
        Self::build(config, None)
    }

    /// Create a manager that gates channel opens behind `authenticator`.
    pub fn with_authenticator(
        config: ManagerConfig,
        authenticator: Arc<dyn Authenticator>,
    ) -> Self {
        Self::build(config, Some(authenticator))
    }

    fn build(config: ManagerConfig, authenticator: Option<Arc<dyn Authenticator>>) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                config,
                registry: Registry::new(),
                factories: Mutex::new(HashMap::new()),
                authenticator,
                tasks: TaskTracker::new(),
            }),
        }
    }

    /// Manager configuration.
    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// Register the factory for channels named `name`, replacing any
    /// previous one.
    pub fn on_open<F>(&self, name: &str, factory: F)
    where
        F: Fn(Arc<Channel>) + Send + Sync + 'static,
    {
        let _ = self
            .inner
            .factories
            .lock()
            .insert(name.to_owned(), Arc::new(factory));
    }

    /// Remove the factory for `name`. Returns whether one was registered.
    pub fn off_open(&self, name: &str) -> bool {
        self.inner.factories.lock().remove(name).is_some()
    }

    /// Number of sessions, including those waiting out a grace period.
    pub fn session_count(&self) -> usize {
        self.inner.registry.session_count()
    }

    /// Number of sessions currently bound to a live link.
    pub fn link_count(&self) -> usize {
        self.inner
            .registry
            .sessions()
            .iter()
            .filter(|s| !s.in_grace() && !s.is_torn_down())
            .count()
    }

    /// Session bound to `link_id`, if any.
    pub fn session_for_link(&self, link_id: &LinkId) -> Option<Arc<Session>> {
        self.inner.registry.by_link(link_id)
    }

    /// Session reachable under `identity`, if any.
    pub fn session_for_identity(&self, identity: &SessionIdentity) -> Option<Arc<Session>> {
        self.inner.registry.by_identity(identity)
    }

    /// Grace timers and authentication tasks still running.
    pub fn pending_tasks(&self) -> usize {
        self.inner.tasks.len()
    }

    /// Tear down every session and wait for pending timers and
    /// authentication tasks. Returns the number of sessions torn down.
    ///
    /// Disconnect handlers fire once per channel. Links that disconnect
    /// afterwards are torn down at once instead of entering a grace period.
    pub async fn shutdown(&self) -> usize {
        let inner = &self.inner;
        let _ = inner.tasks.close();
        let sessions = inner.registry.sessions();
        for session in &sessions {
            session.teardown();
            let _ = inner.registry.remove_session(session);
        }
        inner.record_active();
        info!(
            sessions = sessions.len(),
            pending = inner.tasks.len(),
            "session manager shutting down"
        );
        inner.tasks.wait().await;
        sessions.len()
    }
}

impl Acceptor for ServerManager {
    fn accept(&self, link: Arc<dyn Link>) {
        let inner = &self.inner;
        let link_id = link.id().clone();
        let session = Session::new(
            link.clone(),
            inner.authenticator.is_none(),
            inner.config.codec,
            inner.config.max_channels,
        );
        inner.registry.insert_link(link_id.clone(), session);
        metrics::counter!(SESSIONS_OPENED_TOTAL).increment(1);
        inner.record_active();
        info!(%link_id, "transport open");

        let weak = Arc::downgrade(inner);
        let id = link_id.clone();
        link.on(
            wire::AUTHENTICATION,
            control(&weak, move |inner, value| inner.handle_auth(&id, value)),
        );
        let id = link_id.clone();
        link.on(
            wire::CONNECTION,
            control(&weak, move |inner, value| inner.handle_open(&id, &value)),
        );
        let weak_link = Arc::downgrade(&link);
        link.on(
            wire::CHALLENGE_RECONNECT,
            control(&weak, move |inner, value| {
                if let Some(link) = weak_link.upgrade() {
                    inner.handle_challenge(link, &value);
                }
            }),
        );
        let id = link_id;
        link.on(
            wire::DISCONNECT,
            control(&weak, move |inner, value| inner.handle_disconnect(&id, &value)),
        );
    }
}

fn control<F>(inner: &Weak<ServerInner>, f: F) -> WireHandler
where
    F: Fn(&Arc<ServerInner>, Value) + Send + Sync + 'static,
{
    let inner = inner.clone();
    Arc::new(move |value| {
        if let Some(inner) = inner.upgrade() {
            f(&inner, value);
        }
    })
}

fn token_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

impl ServerInner {
    fn handle_auth(&self, link_id: &LinkId, value: Value) {
        let Some(session) = self.registry.by_link(link_id) else {
            warn!(%link_id, "authentication on unknown link");
            return;
        };
        let Some(authenticator) = self.authenticator.clone() else {
            let _ = session
                .link()
                .emit(wire::AUTHENTICATION, Value::String(wire::AUTH_SUCCESS.into()));
            return;
        };
        let Ok(handle) = Handle::try_current() else {
            warn!(%link_id, "no tokio runtime, authentication dropped");
            return;
        };
        let token = token_text(value);
        let link_id = link_id.clone();
        let _ = self.tasks.spawn_on(
            async move {
                let reply = match authenticator.authenticate(&token).await {
                    Ok(reply) => {
                        session.set_authenticated();
                        info!(%link_id, "session authenticated");
                        reply
                    }
                    Err(rejection) => {
                        warn!(%link_id, reason = %rejection.reason, "authentication rejected");
                        rejection.reply
                    }
                };
                let _ = session.link().emit(wire::AUTHENTICATION, reply);
            },
            &handle,
        );
    }

    fn handle_open(&self, link_id: &LinkId, value: &Value) {
        let Some(session) = self.registry.by_link(link_id) else {
            warn!(%link_id, "channel open on unknown link");
            return;
        };
        if !session.is_authenticated() {
            metrics::counter!(CHANNELS_DROPPED_UNAUTHENTICATED_TOTAL).increment(1);
            debug!(%link_id, "channel open before authentication, dropped");
            return;
        }
        let open = match ChannelOpen::from_wire(value) {
            Ok(open) => open,
            Err(error) => {
                warn!(%link_id, %error, "malformed channel open");
                return;
            }
        };

        let channel = match session.open_channel(&open.name, open.number) {
            Ok(channel) => channel,
            Err(SessionError::TornDown) => {
                debug!(%link_id, "channel open on torn-down session, dropped");
                return;
            }
            Err(error) => {
                let reason = match error {
                    SessionError::ChannelLimit { .. } => RejectReason::ChannelLimit,
                    _ => RejectReason::DuplicateNumber,
                };
                warn!(
                    %link_id,
                    name = %open.name,
                    number = %open.number,
                    %error,
                    "channel open rejected"
                );
                metrics::counter!(CHANNELS_REJECTED_TOTAL, "reason" => reason.as_str())
                    .increment(1);
                reject(session.link().as_ref(), open, reason);
                return;
            }
        };

        let _ = session.set_identity(open.id.clone());
        self.registry.index_identity(open.id.clone(), &session);
        metrics::counter!(CHANNELS_OPENED_TOTAL, "name" => open.name.clone()).increment(1);
        info!(
            %link_id,
            identity = %open.id,
            name = %open.name,
            number = %open.number,
            "connection"
        );

        let factory = self.factories.lock().get(&open.name).cloned();
        match factory {
            Some(factory) => factory(channel),
            None => warn!(name = %open.name, "no factory registered for channel"),
        }
    }

    fn handle_challenge(&self, link: Arc<dyn Link>, value: &Value) {
        let link_id = link.id().clone();
        let identity = match wire::identity_from_wire(value) {
            Ok(identity) => identity,
            Err(error) => {
                warn!(%link_id, %error, "malformed reconnect challenge");
                return;
            }
        };
        let Some(session) = self.registry.by_identity(&identity) else {
            self.challenge_failed(link.as_ref(), &identity);
            return;
        };

        let rebound = match self.registry.by_link(&link_id) {
            Some(fresh) => session.rebind_over(link.clone(), &fresh),
            None => session.rebind(link.clone()),
        };
        match rebound {
            Ok(Rebind::AlreadyBound) => {
                debug!(%link_id, %identity, "challenge on bound link ignored");
            }
            Ok(Rebind::Moved { from }) => {
                if let Some(displaced) = self.registry.move_link(&from, link_id.clone(), &session) {
                    displaced.close();
                }
                metrics::counter!(SESSIONS_REBOUND_TOTAL).increment(1);
                self.record_active();
                info!(%identity, %from, to = %link_id, "reconnect");
            }
            Err(_) => {
                let _ = self.registry.remove_session(&session);
                self.challenge_failed(link.as_ref(), &identity);
            }
        }
    }

    fn challenge_failed(&self, link: &dyn Link, identity: &SessionIdentity) {
        metrics::counter!(CHALLENGES_FAILED_TOTAL).increment(1);
        info!(%identity, link_id = %link.id(), "challenge failed");
        let _ = link.emit(wire::CHALLENGE_FAILED, Value::String(identity.to_string()));
    }

    fn record_active(&self) {
        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!(SESSIONS_ACTIVE).set(self.registry.session_count() as f64);
    }

    fn handle_disconnect(self: &Arc<Self>, link_id: &LinkId, reason: &Value) {
        let Some(session) = self.registry.by_link(link_id) else {
            debug!(%link_id, "disconnect on stale link ignored");
            return;
        };
        if session.link_id() != *link_id {
            debug!(%link_id, "disconnect on superseded link ignored");
            return;
        }
        if self.tasks.is_closed() {
            info!(%link_id, %reason, "transport close during shutdown");
            session.teardown();
            let _ = self.registry.remove_session(&session);
            self.record_active();
            return;
        }
        info!(%link_id, %reason, "transport close timer start");
        let weak = Arc::downgrade(self);
        let expired = session.clone();
        let reason = reason.clone();
        let tasks = &self.tasks;
        let _ = spawn_grace_timer(&session, self.config.grace_period, tasks, move |channels| {
            let link = expired.link();
            for channel in channels {
                channel.teardown(link.as_ref());
            }
            info!(link_id = %link.id(), %reason, "session expired");
            metrics::counter!(SESSIONS_EXPIRED_TOTAL).increment(1);
            if let Some(inner) = weak.upgrade() {
                let _ = inner.registry.remove_session(&expired);
                inner.record_active();
            }
        });
    }
}

fn reject(link: &dyn Link, open: ChannelOpen, reason: RejectReason) {
    let body = ChannelRejected {
        name: open.name,
        number: open.number,
        reason,
    };
    match serde_json::to_value(&body) {
        Ok(value) => {
            let _ = link.emit(wire::CONNECTION_REJECTED, value);
        }
        Err(error) => warn!(%error, "failed to encode channel rejection"),
    }
}
