//! # muxline-core
//!
//! Shared vocabulary for multiplexing many logical channels over a single
//! physical duplex link.
//!
//! - **Ids**: [`LinkId`], [`SessionIdentity`], [`ChannelNumber`] as newtypes
//! - **Wire catalogue**: control event names, channel-open message, and the
//!   `key_<number>` wire-name encoding
//! - **Payloads**: [`Payload`] tagged at the serialization boundary
//! - **Codec**: JSON + lz4 + base64 with raw fallback on decode failure
//! - **Transport**: the [`Link`] contract, the [`EventRouter`] handler table
//!   transports embed, and an in-memory transport
//! - **Logging**: `tracing` subscriber bootstrap

#![deny(unsafe_code)]

pub mod codec;
pub mod errors;
pub mod ids;
pub mod logging;
pub mod payload;
pub mod transport;
pub mod wire;

pub use codec::Codec;
pub use errors::{CodecError, WireError};
pub use ids::{ChannelNumber, LinkId, SessionIdentity};
pub use payload::Payload;
pub use transport::{Acceptor, EventRouter, Link, WireHandler};
