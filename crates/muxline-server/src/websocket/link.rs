//! Server-side link: one accepted WebSocket.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use metrics::counter;
use muxline_core::{EventRouter, Link, LinkId, WireHandler};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use super::{Outbound, dispatch_text, encode_frame};
use crate::metrics::WS_FRAMES_DROPPED_TOTAL;

/// A [`Link`] backed by one accepted WebSocket.
///
/// Outbound frames go through a bounded queue drained by the socket's writer
/// task; a full or closed queue drops the frame.
pub struct WsLink {
    id: LinkId,
    router: EventRouter,
    tx: mpsc::Sender<Outbound>,
    connected_at: Instant,
    is_alive: AtomicBool,
    last_pong: Mutex<Instant>,
    dropped_frames: AtomicU64,
}

impl WsLink {
    /// Create a link feeding `tx`.
    pub fn new(tx: mpsc::Sender<Outbound>) -> Self {
        let now = Instant::now();
        Self {
            id: LinkId::new(),
            router: EventRouter::new(),
            tx,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_frames: AtomicU64::new(0),
        }
    }

    fn enqueue(&self, item: Outbound) -> bool {
        if self.tx.try_send(item).is_ok() {
            true
        } else {
            let _ = self.dropped_frames.fetch_add(1, Ordering::Relaxed);
            counter!(WS_FRAMES_DROPPED_TOTAL).increment(1);
            false
        }
    }

    /// Queue a ping.
    pub fn ping(&self) -> bool {
        self.enqueue(Outbound::Ping)
    }

    /// Ask the writer task to close the socket.
    pub fn close(&self) -> bool {
        self.tx.try_send(Outbound::Close).is_ok()
    }

    /// Deliver one inbound text frame to the registered handlers.
    pub fn receive_text(&self, text: &str) -> bool {
        dispatch_text(&self.router, text)
    }

    /// Raise a local event (e.g. `disconnect`) on this link.
    pub fn dispatch(&self, event: &str, data: Value) -> bool {
        self.router.dispatch(event, data)
    }

    /// Record peer activity.
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Read and reset the alive flag.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Time since the last pong (or since accept).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Frames dropped on a full or closed queue.
    pub fn drop_count(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Time since accept.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl Link for WsLink {
    fn id(&self) -> &LinkId {
        &self.id
    }

    fn emit(&self, event: &str, data: Value) -> bool {
        let Some(text) = encode_frame(event, data) else {
            return false;
        };
        let sent = self.enqueue(Outbound::Frame(text));
        if !sent {
            debug!(link_id = %self.id, event, "outbound queue full or closed");
        }
        sent
    }

    fn on(&self, event: &str, handler: WireHandler) {
        self.router.on(event, handler);
    }

    fn off(&self, event: &str) {
        self.router.off(event);
    }
}
