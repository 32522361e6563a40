//! WebSocket transport binding.
//!
//! Every frame is a JSON text envelope `{"event": <name>, "data": <value>}`.
//! Server-side links ([`WsLink`]) live as long as one socket; the client-side
//! link ([`WsClientLink`]) keeps one identity across reconnects and reports
//! transport lifecycle events through its router.

pub mod client;
pub mod heartbeat;
pub mod link;
pub mod socket;
pub mod table;

pub use client::{ClientConfig, WsClientLink};
pub use link::WsLink;
pub use table::LinkTable;

use metrics::counter;
use muxline_core::EventRouter;
use muxline_core::wire::WireFrame;
use tracing::warn;

use crate::metrics::WS_FRAMES_INVALID_TOTAL;

/// Items queued for a socket's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A serialized envelope.
    Frame(String),
    /// A WebSocket ping.
    Ping,
    /// Close the socket.
    Close,
}

/// Parse one inbound envelope and hand it to `router`.
///
/// Returns `true` when a handler consumed it. Malformed envelopes are logged
/// and counted.
pub(crate) fn dispatch_text(router: &EventRouter, text: &str) -> bool {
    match WireFrame::parse(text) {
        Ok(frame) => router.dispatch(&frame.event, frame.data),
        Err(e) => {
            counter!(WS_FRAMES_INVALID_TOTAL).increment(1);
            warn!(error = %e, len = text.len(), "dropping malformed frame");
            false
        }
    }
}

/// Serialize an envelope for the wire.
pub(crate) fn encode_frame(event: &str, data: serde_json::Value) -> Option<String> {
    match WireFrame::new(event, data).to_text() {
        Ok(text) => Some(text),
        Err(e) => {
            warn!(event, error = %e, "failed to serialize frame");
            None
        }
    }
}
