//! One accepted WebSocket from upgrade through close.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use muxline_core::{Acceptor, Link, wire};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, field, info, instrument, warn};

use super::Outbound;
use super::heartbeat::{HeartbeatResult, run_heartbeat};
use super::link::WsLink;
use super::table::LinkTable;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};

/// Peer closed the socket or the stream ended.
pub const REASON_TRANSPORT_CLOSE: &str = "transport close";
/// Reading from the socket failed.
pub const REASON_TRANSPORT_ERROR: &str = "transport error";
/// Peer stopped answering pings.
pub const REASON_PING_TIMEOUT: &str = "ping timeout";
/// The server is shutting down.
pub const REASON_SERVER_SHUTDOWN: &str = "server shutting down";
/// The heartbeat task panicked or was aborted.
pub const REASON_HEARTBEAT_FAILED: &str = "heartbeat failure";

/// How long the writer gets to flush a close frame.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Everything a link task needs from the server.
#[derive(Clone)]
pub struct LinkContext {
    /// Receives each new link (normally the session manager).
    pub acceptor: Arc<dyn Acceptor>,
    /// Open-link table.
    pub table: Arc<LinkTable>,
    /// Ping interval.
    pub heartbeat_interval: Duration,
    /// Close after this long without a pong.
    pub heartbeat_timeout: Duration,
    /// Outbound queue depth.
    pub send_queue_depth: usize,
    /// Server-wide shutdown signal.
    pub shutdown: CancellationToken,
}

/// Run one link until the peer leaves, the heartbeat fails, or the server
/// shuts down. Raises `disconnect` on the link when done so the session
/// manager can start the grace timer.
#[instrument(skip_all, fields(link_id = field::Empty))]
pub async fn run_link(ws: WebSocket, ctx: LinkContext) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (send_tx, mut send_rx) = mpsc::channel::<Outbound>(ctx.send_queue_depth.max(1));
    let link = Arc::new(WsLink::new(send_tx));
    let _ = tracing::Span::current().record("link_id", field::display(link.id()));

    ctx.table.add(link.clone()).await;
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
    info!("link opened");

    let mut outbound = tokio::spawn(async move {
        while let Some(item) = send_rx.recv().await {
            let message = match item {
                Outbound::Frame(text) => Message::Text(text.into()),
                Outbound::Ping => Message::Ping(Vec::new().into()),
                Outbound::Close => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            };
            if ws_tx.send(message).await.is_err() {
                break;
            }
        }
    });

    ctx.acceptor.accept(link.clone());

    let heartbeat_cancel = ctx.shutdown.child_token();
    let mut heartbeat = tokio::spawn(run_heartbeat(
        link.clone(),
        ctx.heartbeat_interval,
        ctx.heartbeat_timeout,
        heartbeat_cancel.clone(),
    ));

    let reason = loop {
        tokio::select! {
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    link.mark_alive();
                    let _ = link.receive_text(text.as_str());
                }
                Some(Ok(Message::Binary(data))) => {
                    link.mark_alive();
                    if let Ok(text) = std::str::from_utf8(&data) {
                        let _ = link.receive_text(text);
                    } else {
                        info!(len = data.len(), "received non-UTF8 binary frame");
                    }
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => link.mark_alive(),
                Some(Ok(Message::Close(_))) | None => break REASON_TRANSPORT_CLOSE,
                Some(Err(e)) => {
                    debug!(error = %e, "socket read failed");
                    break REASON_TRANSPORT_ERROR;
                }
            },
            result = &mut heartbeat => {
                if matches!(result, Ok(HeartbeatResult::TimedOut)) {
                    warn!(timeout = ?ctx.heartbeat_timeout, "peer unresponsive, closing");
                }
                break heartbeat_reason(result);
            }
            () = ctx.shutdown.cancelled() => break REASON_SERVER_SHUTDOWN,
        }
    };

    heartbeat_cancel.cancel();
    heartbeat.abort();
    if reason == REASON_TRANSPORT_CLOSE {
        outbound.abort();
    } else {
        let _ = link.close();
        if tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, &mut outbound).await.is_err() {
            outbound.abort();
        }
    }

    let _ = ctx.table.remove(link.id()).await;
    let _ = link.dispatch(wire::DISCONNECT, Value::String(reason.into()));

    counter!(WS_DISCONNECTIONS_TOTAL, "reason" => reason).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(link.age().as_secs_f64());
    info!(reason, dropped = link.drop_count(), "link closed");
}

/// Close reason for a finished heartbeat task.
fn heartbeat_reason(result: Result<HeartbeatResult, JoinError>) -> &'static str {
    match result {
        Ok(HeartbeatResult::TimedOut) => REASON_PING_TIMEOUT,
        Ok(HeartbeatResult::Cancelled) => REASON_SERVER_SHUTDOWN,
        Err(e) => {
            error!(error = %e, panicked = e.is_panic(), "heartbeat task failed");
            REASON_HEARTBEAT_FAILED
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_outcomes_map_to_reasons() {
        assert_eq!(heartbeat_reason(Ok(HeartbeatResult::TimedOut)), REASON_PING_TIMEOUT);
        assert_eq!(
            heartbeat_reason(Ok(HeartbeatResult::Cancelled)),
            REASON_SERVER_SHUTDOWN
        );
    }

    #[tokio::test]
    async fn panicked_heartbeat_is_not_a_shutdown() {
        let result = tokio::spawn(async {
            time_bomb();
            HeartbeatResult::Cancelled
        })
        .await;
        assert!(result.as_ref().is_err_and(JoinError::is_panic));
        assert_eq!(heartbeat_reason(result), REASON_HEARTBEAT_FAILED);
    }

    #[tokio::test]
    async fn aborted_heartbeat_is_not_a_shutdown() {
        let task = tokio::spawn(std::future::pending::<HeartbeatResult>());
        task.abort();
        let result = task.await;
        assert!(result.as_ref().is_err_and(JoinError::is_cancelled));
        assert_eq!(heartbeat_reason(result), REASON_HEARTBEAT_FAILED);
    }

    fn time_bomb() {
        panic!("heartbeat exploded");
    }
}
