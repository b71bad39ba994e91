//! Bounded JSON encoding and decoding of request and response bodies.
//!
//! The codec enforces a payload-size ceiling in both directions so a
//! misbehaving server (or an accidentally enormous request) cannot buffer an
//! unbounded body into memory. Decode failures keep the raw payload text so
//! callers can inspect what was actually returned.

use crate::error::{Error, Result};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Default payload ceiling, matching the transport's 10 MiB buffers.
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 10 * 1024 * 1024;

/// JSON codec shared by every request issued from one client instance.
#[derive(Debug, Clone)]
pub struct JsonCodec {
    max_payload_size: usize,
}

impl JsonCodec {
    /// Create a codec with a custom payload ceiling in bytes.
    pub fn new(max_payload_size: usize) -> Self {
        JsonCodec { max_payload_size }
    }

    /// The configured payload ceiling in bytes.
    pub fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }

    /// Serialize a request payload, enforcing the size ceiling.
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Bytes> {
        let payload = serde_json::to_vec(value).map_err(Error::JsonEncoding)?;
        if payload.len() > self.max_payload_size {
            return Err(Error::PayloadTooLarge {
                size: payload.len(),
                limit: self.max_payload_size,
            });
        }
        Ok(Bytes::from(payload))
    }

    /// Deserialize a response payload, enforcing the size ceiling.
    ///
    /// On a parse failure the raw payload text is preserved in the returned
    /// [`Error::JsonParsing`] so the caller can see what the server sent.
    pub fn decode<T: DeserializeOwned>(&self, payload: &[u8]) -> Result<T> {
        if payload.len() > self.max_payload_size {
            return Err(Error::PayloadTooLarge {
                size: payload.len(),
                limit: self.max_payload_size,
            });
        }
        serde_json::from_slice(payload).map_err(|source| Error::JsonParsing {
            payload: String::from_utf8_lossy(payload).into_owned(),
            source,
        })
    }
}

impl Default for JsonCodec {
    fn default() -> Self {
        JsonCodec::new(DEFAULT_MAX_PAYLOAD_SIZE)
    }
}
