//! Error types for channels and sessions.

use muxline_core::{ChannelNumber, CodecError, WireError};
use thiserror::Error;

/// Errors from channel operations.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The key is reserved and never travels as a channel event.
    #[error("event key '{0}' is reserved; register channel factories on the server manager")]
    ReservedKey(String),
    /// The owning session has been torn down.
    #[error("owning session is closed")]
    SessionClosed,
    /// The payload could not be encoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Errors from session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session's grace timer already fired.
    #[error("session has been torn down")]
    TornDown,
    /// A channel with this number already exists in the session.
    #[error("channel number {0} is already open in this session")]
    DuplicateChannel(ChannelNumber),
    /// The session holds the maximum number of channels.
    #[error("session already holds the maximum of {limit} channels")]
    ChannelLimit {
        /// Configured maximum.
        limit: usize,
    },
    /// A control message could not be built or parsed.
    #[error(transparent)]
    Wire(#[from] WireError),
}

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;
