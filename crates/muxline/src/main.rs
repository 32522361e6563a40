//! # muxline
//!
//! Server binary: loads settings, wires a session manager behind the
//! WebSocket server, and serves a demo `echo` channel until Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use muxline_core::logging;
use muxline_server::{MuxServer, ServerConfig, metrics};
use muxline_session::{ManagerConfig, ServerManager, StaticTokenAuthenticator};
use muxline_settings::MuxSettings;
use tracing::info;

/// Name of the demo channel registered by `serve`.
const ECHO_CHANNEL: &str = "echo";

/// How long link tasks get to finish after Ctrl-C.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Channel multiplexer over WebSocket.
#[derive(Parser, Debug)]
#[command(name = "muxline", about = "Multiplexed channels over one WebSocket")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the `echo` channel.
    Serve(ServeArgs),
}

#[derive(clap::Args, Debug)]
struct ServeArgs {
    /// Settings file (default `~/.muxline/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Log filter, e.g. `debug` or `muxline_session=trace` (overrides settings).
    #[arg(long)]
    log_level: Option<String>,
}

impl ServeArgs {
    fn load_settings(&self) -> Result<MuxSettings> {
        let path = self
            .config
            .clone()
            .unwrap_or_else(muxline_settings::settings_path);
        let mut settings = muxline_settings::load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;
        self.apply(&mut settings);
        Ok(settings)
    }

    fn apply(&self, settings: &mut MuxSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
    }
}

/// Session manager for `settings`, gated when tokens are configured.
fn build_manager(settings: &MuxSettings) -> ServerManager {
    let config = ManagerConfig::from_settings(settings);
    let manager = if settings.auth.enabled() {
        info!(tokens = settings.auth.tokens.len(), "token authentication enabled");
        ServerManager::with_authenticator(
            config,
            Arc::new(StaticTokenAuthenticator::new(settings.auth.tokens.clone())),
        )
    } else {
        ServerManager::new(config)
    };
    register_echo(&manager);
    manager
}

/// Every `message` on an `echo` channel comes straight back.
fn register_echo(manager: &ServerManager) {
    manager.on_open(ECHO_CHANNEL, |channel| {
        let reply = Arc::downgrade(&channel);
        let registered = channel.on("message", move |payload| {
            if let Some(channel) = reply.upgrade() {
                if let Err(e) = channel.emit("message", payload) {
                    tracing::warn!(error = %e, "echo failed");
                }
            }
        });
        if let Err(e) = registered {
            tracing::warn!(error = %e, "echo handler not registered");
        }
    });
}

async fn serve(args: ServeArgs) -> Result<()> {
    let settings = args.load_settings()?;
    if settings.logging.json {
        logging::init_json_subscriber(&settings.logging.level);
    } else {
        logging::init_subscriber(&settings.logging.level);
    }

    let recorder = metrics::install_recorder().context("Failed to install metrics recorder")?;
    let manager = build_manager(&settings);
    let config = ServerConfig::from_settings(&settings.server);
    let server = MuxServer::new(config, manager).with_metrics(recorder);
    let handle = server.listen().await.context("Failed to bind server")?;

    info!(
        "muxline listening on ws://{}{} (grace {:?})",
        handle.addr,
        server.config().path,
        settings.session.grace_period()
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    info!("Shutting down...");
    if !server.stop(Some(DRAIN_TIMEOUT)).await {
        tracing::warn!("some links did not close in time");
    }
    let _ = handle.task.await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    match Cli::parse().command {
        Command::Serve(args) => serve(args).await,
    }
}
