//! Error types for the WebSocket binding.

/// Errors raised while binding, serving, or connecting.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listener could not bind its address.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// I/O failure after binding.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The Prometheus recorder could not be installed.
    #[error("metrics recorder: {0}")]
    Metrics(String),
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, ServerError>;
