//! The reconnect-resilient logical session bound to one link at a time.
//!
//! A session moves through three lifecycle states:
//!
//! - `Bound`: the current link is believed live.
//! - `Grace`: the link dropped; a cancellable timer is counting down.
//! - `TornDown`: the timer fired; every channel has been discarded.
//!
//! Rebinding and expiry both take the lifecycle lock, so a reconnect that
//! loses the race against the timer observes `TornDown` and is refused.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use muxline_core::{ChannelNumber, Codec, Link, LinkId, SessionIdentity};
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::channel::Channel;
use crate::errors::{Result, SessionError};

enum Lifecycle {
    Bound,
    Grace {
        generation: u64,
        cancel: CancellationToken,
    },
    TornDown,
}

struct State {
    lifecycle: Lifecycle,
    generation: u64,
}

/// Outcome of [`Session::rebind`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rebind {
    /// The session was already bound to the offered link.
    AlreadyBound,
    /// The session moved off the link with this id.
    Moved {
        /// The stale link the session left.
        from: LinkId,
    },
}

/// One logical session.
pub struct Session {
    link: RwLock<Arc<dyn Link>>,
    identity: Mutex<Option<SessionIdentity>>,
    authenticated: AtomicBool,
    codec: Codec,
    max_channels: usize,
    channels: Mutex<BTreeMap<ChannelNumber, Arc<Channel>>>,
    state: Mutex<State>,
}

impl Session {
    /// Create a session bound to `link`.
    pub fn new(
        link: Arc<dyn Link>,
        authenticated: bool,
        codec: Codec,
        max_channels: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            link: RwLock::new(link),
            identity: Mutex::new(None),
            authenticated: AtomicBool::new(authenticated),
            codec,
            max_channels,
            channels: Mutex::new(BTreeMap::new()),
            state: Mutex::new(State {
                lifecycle: Lifecycle::Bound,
                generation: 0,
            }),
        })
    }

    /// The link this session currently sends on.
    pub fn link(&self) -> Arc<dyn Link> {
        self.link.read().clone()
    }

    /// Id of the current link.
    pub fn link_id(&self) -> LinkId {
        self.link.read().id().clone()
    }

    /// Identity learned from the initiator, if any.
    pub fn identity(&self) -> Option<SessionIdentity> {
        self.identity.lock().clone()
    }

    /// Record the initiator's identity. Returns whether it changed.
    pub fn set_identity(&self, identity: SessionIdentity) -> bool {
        let mut slot = self.identity.lock();
        if slot.as_ref() == Some(&identity) {
            return false;
        }
        *slot = Some(identity);
        true
    }

    /// Whether channel opens are accepted.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    /// Mark the session authenticated.
    pub fn set_authenticated(&self) {
        self.authenticated.store(true, Ordering::SeqCst);
    }

    /// Whether the grace timer has fired.
    pub fn is_torn_down(&self) -> bool {
        matches!(self.state.lock().lifecycle, Lifecycle::TornDown)
    }

    /// Whether a grace timer is pending.
    pub fn in_grace(&self) -> bool {
        matches!(self.state.lock().lifecycle, Lifecycle::Grace { .. })
    }

    /// Open channel `number` named `name`.
    ///
    /// Duplicate numbers and opens beyond the channel limit are refused; the
    /// existing channel is left untouched.
    pub fn open_channel(
        self: &Arc<Self>,
        name: &str,
        number: ChannelNumber,
    ) -> Result<Arc<Channel>> {
        // Held across the insert so a concurrent expiry drains this channel
        // or refuses it, never neither.
        let state = self.state.lock();
        if matches!(state.lifecycle, Lifecycle::TornDown) {
            return Err(SessionError::TornDown);
        }
        let mut channels = self.channels.lock();
        if channels.contains_key(&number) {
            return Err(SessionError::DuplicateChannel(number));
        }
        if channels.len() >= self.max_channels {
            return Err(SessionError::ChannelLimit {
                limit: self.max_channels,
            });
        }
        let channel = Channel::new(self, name.to_owned(), number, self.codec);
        let _ = channels.insert(number, channel.clone());
        debug!(name, %number, "channel opened");
        Ok(channel)
    }

    /// Look up a channel by number.
    pub fn channel(&self, number: ChannelNumber) -> Option<Arc<Channel>> {
        self.channels.lock().get(&number).cloned()
    }

    /// Remove a channel, unregistering its handlers without firing any.
    pub fn remove_channel(&self, number: ChannelNumber) -> Option<Arc<Channel>> {
        let channel = self.channels.lock().remove(&number)?;
        channel.detach(self.link().as_ref());
        Some(channel)
    }

    /// Number of open channels.
    pub fn channel_count(&self) -> usize {
        self.channels.lock().len()
    }

    /// Snapshot of the open channels in number order.
    pub fn channels(&self) -> Vec<Arc<Channel>> {
        self.channels.lock().values().cloned().collect()
    }

    /// Enter the grace state, replacing any pending timer.
    ///
    /// Returns the generation the timer must present to [`Session::expire`]
    /// and the token that cancels it, or `None` if already torn down.
    pub fn begin_grace(&self) -> Option<(u64, CancellationToken)> {
        let mut state = self.state.lock();
        match &state.lifecycle {
            Lifecycle::TornDown => return None,
            Lifecycle::Grace { cancel, .. } => cancel.cancel(),
            Lifecycle::Bound => {}
        }
        state.generation += 1;
        let cancel = CancellationToken::new();
        state.lifecycle = Lifecycle::Grace {
            generation: state.generation,
            cancel: cancel.clone(),
        };
        Some((state.generation, cancel))
    }

    /// Leave the grace state without rebinding. Returns whether a timer was
    /// pending.
    pub fn cancel_grace(&self) -> bool {
        let mut state = self.state.lock();
        if let Lifecycle::Grace { cancel, .. } = &state.lifecycle {
            cancel.cancel();
            state.lifecycle = Lifecycle::Bound;
            return true;
        }
        false
    }

    /// Tear the session down if `generation` is still the pending timer.
    ///
    /// Returns the drained channels for the caller to dispose of, or `None`
    /// when the timer was superseded or cancelled.
    pub(crate) fn expire(&self, generation: u64) -> Option<Vec<Arc<Channel>>> {
        {
            let mut state = self.state.lock();
            let pending = match &state.lifecycle {
                Lifecycle::Grace { generation: g, .. } => Some(*g),
                _ => None,
            };
            if pending != Some(generation) {
                return None;
            }
            state.lifecycle = Lifecycle::TornDown;
        }
        Some(self.drain())
    }

    /// Tear the session down immediately, firing every channel's disconnect
    /// handler. Idempotent.
    pub fn teardown(&self) {
        if !self.mark_torn_down() {
            return;
        }
        let link = self.link();
        for channel in self.drain() {
            channel.teardown(link.as_ref());
        }
    }

    /// Tear the session down without firing any handler. Idempotent.
    pub fn close(&self) {
        if !self.mark_torn_down() {
            return;
        }
        let link = self.link();
        for channel in self.drain() {
            channel.detach(link.as_ref());
        }
    }

    fn mark_torn_down(&self) -> bool {
        let mut state = self.state.lock();
        match &state.lifecycle {
            Lifecycle::TornDown => false,
            Lifecycle::Grace { cancel, .. } => {
                cancel.cancel();
                state.lifecycle = Lifecycle::TornDown;
                true
            }
            Lifecycle::Bound => {
                state.lifecycle = Lifecycle::TornDown;
                true
            }
        }
    }

    fn drain(&self) -> Vec<Arc<Channel>> {
        std::mem::take(&mut *self.channels.lock())
            .into_values()
            .collect()
    }

    /// Move this session onto `link` and re-arm every channel's handlers.
    ///
    /// Cancels a pending grace timer. Fails with [`SessionError::TornDown`]
    /// once the timer has fired.
    pub fn rebind(&self, link: Arc<dyn Link>) -> Result<Rebind> {
        self.rebind_inner(link, None)
    }

    /// Like [`Session::rebind`], and on a move also discards the channels
    /// `fresh` opened on `link`, which would share wire names with this
    /// session's handlers. `fresh` is left intact when the rebind fails.
    pub fn rebind_over(&self, link: Arc<dyn Link>, fresh: &Session) -> Result<Rebind> {
        self.rebind_inner(link, Some(fresh))
    }

    fn rebind_inner(&self, link: Arc<dyn Link>, fresh: Option<&Session>) -> Result<Rebind> {
        let mut state = self.state.lock();
        if matches!(state.lifecycle, Lifecycle::TornDown) {
            return Err(SessionError::TornDown);
        }
        let old = {
            let mut current = self.link.write();
            if current.id() == link.id() {
                return Ok(Rebind::AlreadyBound);
            }
            std::mem::replace(&mut *current, link.clone())
        };
        if let Some(fresh) = fresh.filter(|f| !std::ptr::eq(*f, self)) {
            for channel in fresh.drain() {
                channel.detach(link.as_ref());
            }
        }
        if let Lifecycle::Grace { cancel, .. } = &state.lifecycle {
            cancel.cancel();
        }
        state.lifecycle = Lifecycle::Bound;

        for channel in self.channels() {
            channel.unregister_all(old.as_ref());
            channel.reregister_all(link.as_ref());
        }
        drop(state);

        info!(from = %old.id(), to = %link.id(), "session rebound");
        Ok(Rebind::Moved {
            from: old.id().clone(),
        })
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("link_id", &self.link_id())
            .field("identity", &self.identity())
            .field("authenticated", &self.is_authenticated())
            .field("channels", &self.channel_count())
            .finish_non_exhaustive()
    }
}

/// Start (or restart) the grace timer for `session`.
///
/// When `period` elapses with no intervening rebind or cancel, the session
/// is torn down and `on_expire` receives the drained channels. The timer
/// task is spawned on `tasks`. Returns `false` when no timer was started
/// (already torn down, or no runtime).
pub fn spawn_grace_timer<F>(
    session: &Arc<Session>,
    period: Duration,
    tasks: &TaskTracker,
    on_expire: F,
) -> bool
where
    F: FnOnce(Vec<Arc<Channel>>) + Send + 'static,
{
    let Ok(handle) = Handle::try_current() else {
        warn!("no tokio runtime, grace timer not started");
        return false;
    };
    let Some((generation, cancel)) = session.begin_grace() else {
        return false;
    };
    debug!(link_id = %session.link_id(), generation, ?period, "grace timer started");
    let session = session.clone();
    let _ = tasks.spawn_on(
        async move {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!(generation, "grace timer cancelled");
                }
                () = tokio::time::sleep(period) => {
                    if let Some(channels) = session.expire(generation) {
                        on_expire(channels);
                    }
                }
            }
        },
        &handle,
    );
    true
}
