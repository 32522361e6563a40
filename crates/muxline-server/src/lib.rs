//! # muxline-server
//!
//! WebSocket binding for muxline.
//!
//! - [`MuxServer`]: axum router with `/health`, `/metrics`, and the upgrade
//!   endpoint; each socket becomes a [`WsLink`] handed to a
//!   [`ServerManager`](muxline_session::ServerManager)
//! - [`WsClientLink`]: dialing link with fixed-delay reconnection, for
//!   [`ClientManager`](muxline_session::ClientManager)
//! - [`ShutdownCoordinator`]: cancellation plus task draining

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use errors::{Result, ServerError};
pub use server::{AppState, MuxServer, ServerHandle};
pub use shutdown::ShutdownCoordinator;
pub use websocket::{ClientConfig, LinkTable, WsClientLink, WsLink};
