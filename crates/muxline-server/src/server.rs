//! `MuxServer`: axum HTTP + WebSocket front door for a [`ServerManager`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use chrono::{DateTime, Utc};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use muxline_session::ServerManager;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::errors::{Result, ServerError};
use crate::health::{self, HealthResponse};
use crate::metrics::{WS_CONNECTIONS_REFUSED_TOTAL, render};
use crate::shutdown::{DEFAULT_DRAIN_TIMEOUT, ShutdownCoordinator};
use crate::websocket::socket::{LinkContext, run_link};
use crate::websocket::table::LinkTable;

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Session manager receiving every accepted link.
    pub manager: ServerManager,
    /// Open links.
    pub links: Arc<LinkTable>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// When the server started.
    pub start_time: Instant,
    /// Wall-clock start time.
    pub started_at: DateTime<Utc>,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// A running listener.
pub struct ServerHandle {
    /// Address actually bound.
    pub addr: SocketAddr,
    /// The serve task; completes after shutdown.
    pub task: JoinHandle<()>,
}

/// The muxline server.
pub struct MuxServer {
    config: Arc<ServerConfig>,
    manager: ServerManager,
    links: Arc<LinkTable>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    started_at: DateTime<Utc>,
    metrics: Option<PrometheusHandle>,
}

impl MuxServer {
    /// Create a server fronting `manager`.
    pub fn new(config: ServerConfig, manager: ServerManager) -> Self {
        Self {
            config: Arc::new(config),
            manager,
            links: Arc::new(LinkTable::new()),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            started_at: Utc::now(),
            metrics: None,
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the axum router.
    pub fn router(&self) -> Router {
        let state = AppState {
            manager: self.manager.clone(),
            links: self.links.clone(),
            shutdown: self.shutdown.clone(),
            config: self.config.clone(),
            start_time: self.start_time,
            started_at: self.started_at,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route(&self.config.path, get(ws_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind and serve in the background until [`ShutdownCoordinator::shutdown`].
    pub async fn listen(&self) -> Result<ServerHandle> {
        let bind_addr = self.config.bind_addr();
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: bind_addr.clone(),
                source,
            })?;
        let addr = listener.local_addr()?;
        info!(%addr, path = %self.config.path, "listening");

        let router = self.router();
        let token = self.shutdown.token();
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(error = %e, "server error");
            }
        });
        Ok(ServerHandle { addr, task })
    }

    /// Stop accepting, close every link, and wait up to `timeout` for link
    /// tasks to finish. Sessions left in their grace period are then torn
    /// down and their timers awaited within the same budget.
    pub async fn stop(&self, timeout: Option<Duration>) -> bool {
        let timeout = timeout.unwrap_or(DEFAULT_DRAIN_TIMEOUT);
        let started = Instant::now();
        let _ = self.links.close_all().await;
        if !self.shutdown.drain(Some(timeout)).await {
            return false;
        }
        let remaining = timeout.saturating_sub(started.elapsed());
        match tokio::time::timeout(remaining, self.manager.shutdown()).await {
            Ok(sessions) => {
                info!(sessions, "sessions torn down");
                true
            }
            Err(_) => {
                warn!(pending = self.manager.pending_tasks(), "session shutdown timed out");
                false
            }
        }
    }

    /// Get the session manager.
    pub fn manager(&self) -> &ServerManager {
        &self.manager
    }

    /// Get the open-link table.
    pub fn links(&self) -> &Arc<LinkTable> {
        &self.links
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let links = state.links.count().await;
    Json(health::health_check(
        state.start_time,
        state.started_at,
        links,
        state.manager.session_count(),
        state.manager.link_count(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => render(handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

/// GET <path>: WebSocket upgrade.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if state.shutdown.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }
    let open = state.links.count().await;
    if open >= state.config.max_connections {
        counter!(WS_CONNECTIONS_REFUSED_TOTAL).increment(1);
        warn!(open, max = state.config.max_connections, "connection limit reached");
        return (StatusCode::SERVICE_UNAVAILABLE, "too many connections").into_response();
    }

    let ctx = LinkContext {
        acceptor: Arc::new(state.manager.clone()),
        table: state.links.clone(),
        heartbeat_interval: state.config.heartbeat_interval(),
        heartbeat_timeout: state.config.heartbeat_timeout(),
        send_queue_depth: state.config.send_queue_depth,
        shutdown: state.shutdown.token(),
    };
    let shutdown = state.shutdown.clone();
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| shutdown.track(run_link(socket, ctx)))
}
