//! # muxline-session
//!
//! Channels, sessions, and the two session managers.
//!
//! - [`Channel`]: logical sub-connection; records every handler so it can be
//!   re-armed on a replacement link
//! - [`Session`]: bound to one link at a time, with a cancellable grace timer
//! - [`Registry`]: sessions indexed by link id and by identity
//! - [`ServerManager`]: accepts links, gates channel opens behind an optional
//!   [`Authenticator`], answers reconnect challenges
//! - [`ClientManager`]: opens channels, sends the reconnect challenge, reports
//!   [`LifecycleEvent`]s

#![deny(unsafe_code)]

pub mod auth;
pub mod channel;
pub mod client;
pub mod config;
pub mod errors;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod session;

pub use auth::{AuthRejection, Authenticator, FnAuthenticator, StaticTokenAuthenticator};
pub use channel::{Channel, PayloadHandler};
pub use client::{ClientManager, LifecycleCallback, LifecycleEvent};
pub use config::ManagerConfig;
pub use errors::{ChannelError, SessionError};
pub use registry::Registry;
pub use server::{ChannelFactory, ServerManager};
pub use session::{Rebind, Session};
