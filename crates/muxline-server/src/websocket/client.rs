//! Client-side link with automatic reconnection.
//!
//! The link keeps one [`LinkId`] and one handler table for its whole life.
//! A background task owns the socket: it dials, pumps frames, and redials
//! after a loss, raising the transport lifecycle events (`connect`,
//! `disconnect`, `reconnect`, `connect_error`, `connect_timeout`,
//! `reconnect_error`, `reconnect_failed`) through the same handler table as
//! wire events.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use metrics::counter;
use muxline_core::{EventRouter, Link, LinkId, WireHandler, wire};
use muxline_settings::ClientSettings;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::socket::{REASON_TRANSPORT_CLOSE, REASON_TRANSPORT_ERROR};
use super::{Outbound, dispatch_text, encode_frame};
use crate::metrics::WS_CLIENT_ATTEMPTS_TOTAL;

type ClientStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Reason reported when the local side closed the link.
pub const REASON_CLIENT_CLOSE: &str = "io client disconnect";

/// Client link configuration.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Server URL, e.g. `ws://127.0.0.1:8080/ws`.
    pub url: String,
    /// Per-attempt connect timeout.
    pub connect_timeout: Duration,
    /// Fixed delay between attempts.
    pub reconnect_delay: Duration,
    /// Consecutive failed attempts before giving up (`0` retries forever).
    pub reconnect_attempts: u32,
    /// Outbound queue depth.
    pub send_queue_depth: usize,
}

impl ClientConfig {
    /// Build from loaded settings.
    pub fn from_settings(settings: &ClientSettings) -> Self {
        Self {
            url: settings.url.clone(),
            connect_timeout: settings.connect_timeout(),
            reconnect_delay: settings.reconnect_delay(),
            reconnect_attempts: settings.reconnect_attempts,
            send_queue_depth: settings.send_queue_depth,
        }
    }

    /// Config for `url` with default timings.
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::from_settings(&ClientSettings::default())
        }
    }
}

struct Shared {
    router: EventRouter,
    tx: Mutex<Option<mpsc::Sender<Outbound>>>,
}

/// A [`Link`] that dials a server and redials after every loss.
pub struct WsClientLink {
    id: LinkId,
    config: ClientConfig,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WsClientLink {
    /// Create an idle link. Register handlers, then call [`start`](Self::start).
    pub fn new(config: ClientConfig) -> Arc<Self> {
        Arc::new(Self {
            id: LinkId::new(),
            config,
            shared: Arc::new(Shared {
                router: EventRouter::new(),
                tx: Mutex::new(None),
            }),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        })
    }

    /// Create a link and start dialing immediately.
    ///
    /// Handlers registered after this call may miss the first lifecycle
    /// event; use [`new`](Self::new) + [`start`](Self::start) when that
    /// matters.
    pub fn connect(config: ClientConfig) -> Arc<Self> {
        let link = Self::new(config);
        link.start();
        link
    }

    /// Spawn the connection loop. Later calls are no-ops.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }
        *task = Some(tokio::spawn(connection_loop(
            self.config.clone(),
            self.shared.clone(),
            self.cancel.clone(),
        )));
    }

    /// Whether a socket is currently up.
    pub fn is_connected(&self) -> bool {
        self.shared.tx.lock().is_some()
    }

    /// Stop reconnecting and close the socket. Raises `disconnect` if a
    /// socket was up.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Close and wait for the connection loop to finish.
    pub async fn shutdown(&self) {
        self.close();
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl Drop for WsClientLink {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl Link for WsClientLink {
    fn id(&self) -> &LinkId {
        &self.id
    }

    fn emit(&self, event: &str, data: Value) -> bool {
        let Some(tx) = self.shared.tx.lock().clone() else {
            debug!(event, "link down, dropping");
            return false;
        };
        encode_frame(event, data).is_some_and(|text| tx.try_send(Outbound::Frame(text)).is_ok())
    }

    fn on(&self, event: &str, handler: WireHandler) {
        self.shared.router.on(event, handler);
    }

    fn off(&self, event: &str) {
        self.shared.router.off(event);
    }
}

async fn connection_loop(config: ClientConfig, shared: Arc<Shared>, cancel: CancellationToken) {
    let mut connected_once = false;
    let mut failures: u32 = 0;

    loop {
        let dial = connect_async(config.url.as_str());
        let attempt = tokio::select! {
            () = cancel.cancelled() => break,
            r = tokio::time::timeout(config.connect_timeout, dial) => r,
        };

        match attempt {
            Ok(Ok((stream, _response))) => {
                failures = 0;
                counter!(WS_CLIENT_ATTEMPTS_TOTAL, "outcome" => "connected").increment(1);
                let (tx, rx) = mpsc::channel(config.send_queue_depth.max(1));
                *shared.tx.lock() = Some(tx);

                let event = if connected_once { wire::RECONNECT } else { wire::CONNECT };
                connected_once = true;
                info!(url = %config.url, event, "link up");
                let _ = shared.router.dispatch(event, Value::Null);

                let reason = pump(stream, rx, &shared.router, &cancel).await;
                *shared.tx.lock() = None;
                info!(reason, "link down");
                let _ = shared.router.dispatch(wire::DISCONNECT, Value::String(reason.into()));
                if cancel.is_cancelled() {
                    break;
                }
                continue;
            }
            Ok(Err(e)) => {
                failures += 1;
                counter!(WS_CLIENT_ATTEMPTS_TOTAL, "outcome" => "error").increment(1);
                warn!(url = %config.url, error = %e, failures, "connect attempt failed");
                let event = if connected_once {
                    wire::RECONNECT_ERROR
                } else {
                    wire::CONNECT_ERROR
                };
                let _ = shared.router.dispatch(event, Value::String(e.to_string()));
            }
            Err(_) => {
                failures += 1;
                counter!(WS_CLIENT_ATTEMPTS_TOTAL, "outcome" => "timeout").increment(1);
                warn!(
                    url = %config.url,
                    timeout = ?config.connect_timeout,
                    failures,
                    "connect attempt timed out"
                );
                let event = if connected_once {
                    wire::RECONNECT_ERROR
                } else {
                    wire::CONNECT_TIMEOUT
                };
                let _ = shared.router.dispatch(event, Value::String("timeout".into()));
            }
        }

        if config.reconnect_attempts > 0 && failures >= config.reconnect_attempts {
            warn!(failures, "giving up on reconnection");
            let _ = shared.router.dispatch(wire::RECONNECT_FAILED, Value::Null);
            break;
        }

        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(config.reconnect_delay) => {}
        }
    }
    debug!("connection loop finished");
}

/// Move frames both ways until the socket ends. Returns the disconnect reason.
async fn pump(
    stream: ClientStream,
    mut rx: mpsc::Receiver<Outbound>,
    router: &EventRouter,
    cancel: &CancellationToken,
) -> &'static str {
    let (mut ws_tx, mut ws_rx) = stream.split();

    loop {
        tokio::select! {
            item = rx.recv() => {
                let message = match item {
                    Some(Outbound::Frame(text)) => Message::Text(text.into()),
                    Some(Outbound::Ping) => Message::Ping(Vec::new().into()),
                    Some(Outbound::Close) | None => {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        return REASON_CLIENT_CLOSE;
                    }
                };
                if ws_tx.send(message).await.is_err() {
                    return REASON_TRANSPORT_ERROR;
                }
            }
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let _ = dispatch_text(router, text.as_str());
                }
                Some(Ok(Message::Binary(data))) => {
                    if let Ok(text) = std::str::from_utf8(&data) {
                        let _ = dispatch_text(router, text);
                    }
                }
                Some(Ok(Message::Close(_))) | None => return REASON_TRANSPORT_CLOSE,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(error = %e, "socket read failed");
                    return REASON_TRANSPORT_ERROR;
                }
            },
            () = cancel.cancelled() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                return REASON_CLIENT_CLOSE;
            }
        }
    }
}
