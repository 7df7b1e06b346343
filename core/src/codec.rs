//! Wire codec for queue message bodies.
//!
//! Two layers are encoded:
//!
//! - **Payload**: the request's `name`, as a small versioned JSON record
//!   (`{"v":1,"name":"Ada"}`). Self-describing so the processor needs no
//!   out-of-band schema.
//! - **Envelope**: the [`RequestEnvelope`] / [`ResultEnvelope`] carried as the
//!   queue message body, as bincode of a versioned enum. The enum variant
//!   index acts as the format version.
//!
//! Any decode failure is a [`CodecError::MalformedPayload`]. A malformed
//! message will never decode on redelivery either, so callers must treat it as
//! poison rather than retrying.
//!
//! # Example
//!
//! ```
//! use request_relay_core::codec;
//!
//! let bytes = codec::encode_name(Some("Ada")).unwrap();
//! assert_eq!(codec::decode_name(&bytes).unwrap().as_deref(), Some("Ada"));
//!
//! let bytes = codec::encode_name(None).unwrap();
//! assert_eq!(codec::decode_name(&bytes).unwrap(), None);
//! ```

use crate::envelope::{RequestEnvelope, ResultEnvelope};
use bincode::Options;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Current payload format version.
pub const PAYLOAD_VERSION: u8 = 1;

/// Largest message body the codec will produce or accept (64 KiB).
pub const MAX_MESSAGE_BYTES: u64 = 64 * 1024;

/// Errors produced by the codec.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Bytes could not be decoded; the message is poison
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// A value could not be encoded (for example, it exceeds the size limit)
    #[error("Failed to encode: {0}")]
    EncodeFailed(String),
}

#[derive(Serialize, Deserialize)]
struct NamePayload {
    v: u8,
    name: Option<String>,
}

#[derive(Serialize)]
enum VersionedRef<'a, T> {
    V1(&'a T),
}

#[derive(Deserialize)]
enum Versioned<T> {
    V1(T),
}

fn wire_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_limit(MAX_MESSAGE_BYTES)
}

/// Encode an optional name as a request payload.
///
/// # Errors
///
/// Returns [`CodecError::EncodeFailed`] if JSON serialization fails.
pub fn encode_name(name: Option<&str>) -> Result<Vec<u8>, CodecError> {
    let payload = NamePayload {
        v: PAYLOAD_VERSION,
        name: name.map(str::to_string),
    };
    serde_json::to_vec(&payload).map_err(|e| CodecError::EncodeFailed(e.to_string()))
}

/// Decode a request payload back into an optional name.
///
/// An empty name decodes as absent.
///
/// # Errors
///
/// Returns [`CodecError::MalformedPayload`] if the bytes are not a payload
/// record or carry an unsupported version.
pub fn decode_name(bytes: &[u8]) -> Result<Option<String>, CodecError> {
    let payload: NamePayload = serde_json::from_slice(bytes)
        .map_err(|e| CodecError::MalformedPayload(format!("invalid payload record: {e}")))?;

    if payload.v != PAYLOAD_VERSION {
        return Err(CodecError::MalformedPayload(format!(
            "unsupported payload version {}",
            payload.v
        )));
    }

    Ok(payload.name.filter(|name| !name.is_empty()))
}

/// Encode a request envelope as a queue message body.
///
/// # Errors
///
/// Returns [`CodecError::EncodeFailed`] if the envelope exceeds
/// [`MAX_MESSAGE_BYTES`].
pub fn encode_request(envelope: &RequestEnvelope) -> Result<Vec<u8>, CodecError> {
    encode_versioned(envelope)
}

/// Decode a queue message body into a request envelope.
///
/// # Errors
///
/// Returns [`CodecError::MalformedPayload`] if the body is not a request
/// envelope.
pub fn decode_request(bytes: &[u8]) -> Result<RequestEnvelope, CodecError> {
    decode_versioned(bytes)
}

/// Encode a result envelope as a queue message body.
///
/// # Errors
///
/// Returns [`CodecError::EncodeFailed`] if the envelope exceeds
/// [`MAX_MESSAGE_BYTES`].
pub fn encode_result(envelope: &ResultEnvelope) -> Result<Vec<u8>, CodecError> {
    encode_versioned(envelope)
}

/// Decode a queue message body into a result envelope.
///
/// # Errors
///
/// Returns [`CodecError::MalformedPayload`] if the body is not a result
/// envelope.
pub fn decode_result(bytes: &[u8]) -> Result<ResultEnvelope, CodecError> {
    decode_versioned(bytes)
}

fn encode_versioned<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    wire_options()
        .serialize(&VersionedRef::V1(value))
        .map_err(|e| CodecError::EncodeFailed(e.to_string()))
}

fn decode_versioned<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, CodecError> {
    let versioned: Versioned<T> = wire_options()
        .deserialize(bytes)
        .map_err(|e| CodecError::MalformedPayload(e.to_string()))?;

    match versioned {
        Versioned::V1(value) => Ok(value),
    }
}
