//! Payload codec: JSON, then lz4 (size-prepended block), then base64.
//!
//! Decoding never fails from a handler's point of view. A string that does
//! not survive base64 → lz4 → JSON is taken to be uncompressed and delivered
//! as-is.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;
use tracing::trace;

use crate::errors::CodecError;
use crate::payload::Payload;

/// Default bound on the decompressed size of a single payload (16 MiB).
pub const DEFAULT_MAX_DECODED_BYTES: usize = 16 * 1024 * 1024;

/// Bytes of little-endian size prefix written by `compress_prepend_size`.
const SIZE_PREFIX_LEN: usize = 4;

/// Encodes channel payloads for the wire and decodes them on receipt.
#[derive(Clone, Copy, Debug)]
pub struct Codec {
    max_decoded_bytes: usize,
}

impl Codec {
    /// Create a codec with a decompressed-size limit.
    pub fn new(max_decoded_bytes: usize) -> Self {
        Self { max_decoded_bytes }
    }

    /// The configured decompressed-size limit.
    pub fn max_decoded_bytes(&self) -> usize {
        self.max_decoded_bytes
    }

    /// Encode a payload into the value sent on the wire.
    ///
    /// Primitives pass through untouched; text and structured values become
    /// a base64 string of the lz4-compressed JSON.
    pub fn encode(&self, payload: &Payload) -> Result<Value, CodecError> {
        if payload.is_primitive() {
            return Ok(payload.to_value());
        }
        let json = serde_json::to_vec(&payload.to_value())?;
        let compressed = lz4_flex::compress_prepend_size(&json);
        Ok(Value::String(STANDARD.encode(compressed)))
    }

    /// Decode a received wire value into a payload, falling back to the raw
    /// value when it was not produced by [`Codec::encode`].
    pub fn decode(&self, value: Value) -> Payload {
        match value {
            Value::String(text) => match self.decode_text(&text) {
                Ok(decoded) => Payload::from(decoded),
                Err(e) => {
                    trace!(error = %e, "payload not compressed, delivering raw");
                    Payload::Text(text)
                }
            },
            other => Payload::from(other),
        }
    }

    /// Strict inverse of [`Codec::encode`] for string values.
    pub fn decode_text(&self, text: &str) -> Result<Value, CodecError> {
        let bytes = STANDARD.decode(text)?;
        let prefix: [u8; SIZE_PREFIX_LEN] = bytes
            .get(..SIZE_PREFIX_LEN)
            .and_then(|p| p.try_into().ok())
            .ok_or(CodecError::Truncated)?;
        let claimed = u32::from_le_bytes(prefix) as usize;
        if claimed > self.max_decoded_bytes {
            return Err(CodecError::TooLarge {
                claimed,
                limit: self.max_decoded_bytes,
            });
        }
        let json = lz4_flex::decompress_size_prepended(&bytes)?;
        Ok(serde_json::from_slice(&json)?)
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DECODED_BYTES)
    }
}
