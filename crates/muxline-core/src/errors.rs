//! Error types for the codec and wire layers.

use thiserror::Error;

/// Errors raised while encoding or decoding a channel payload.
///
/// Decode errors never reach channel handlers: the receiving side treats them
/// as "payload was not compressed" and delivers the raw value instead.
#[derive(Debug, Error)]
pub enum CodecError {
    /// JSON serialization or parsing failed.
    #[error("payload JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// The text was not valid base64.
    #[error("payload is not base64: {0}")]
    Base64(#[from] base64::DecodeError),
    /// The bytes were not a valid lz4 block.
    #[error("payload is not lz4: {0}")]
    Decompress(#[from] lz4_flex::block::DecompressError),
    /// The block is too short to carry its size prefix.
    #[error("payload block is truncated")]
    Truncated,
    /// The block claims a decoded size above the configured limit.
    #[error("decoded payload of {claimed} bytes exceeds limit of {limit}")]
    TooLarge {
        /// Size prefix read from the block.
        claimed: usize,
        /// Configured maximum.
        limit: usize,
    },
}

/// Errors raised while parsing control messages and frames.
#[derive(Debug, Error)]
pub enum WireError {
    /// The frame or message was not the expected JSON shape.
    #[error("malformed wire message: {0}")]
    Malformed(#[from] serde_json::Error),
    /// A control message arrived with a value of the wrong JSON type.
    #[error("unexpected value for '{event}': expected {expected}")]
    UnexpectedValue {
        /// Wire event name.
        event: String,
        /// Description of the expected shape.
        expected: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn too_large_display() {
        let err = CodecError::TooLarge {
            claimed: 100,
            limit: 10,
        };
        assert_eq!(
            err.to_string(),
            "decoded payload of 100 bytes exceeds limit of 10"
        );
    }

    #[test]
    fn json_error_from_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{bad}").unwrap_err();
        let err: WireError = json_err.into();
        assert!(matches!(err, WireError::Malformed(_)));
    }

    #[test]
    fn unexpected_value_display() {
        let err = WireError::UnexpectedValue {
            event: "connection".into(),
            expected: "a JSON string",
        };
        assert!(err.to_string().contains("'connection'"));
    }
}
