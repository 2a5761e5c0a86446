//! Cast hash decoding.
//!
//! Accepted encodings:
//! - raw bytes (`b'...'` literals)
//! - Node.js Buffer objects: `{"type": "Buffer", "data": [1, 2, ...]}`
//! - `0x`-prefixed hex
//! - bare 40-character hex
//! - standard base64
//!
//! Any encoding that decodes cleanly but to a length other than 20 bytes is a
//! [`DecodeErrorKind::ReferenceHashLengthInvalid`](crate::DecodeErrorKind)
//! failure; anything that does not decode at all is an element shape failure.

use crate::error::{DecodeError, DecodeResult};
use crate::literal::Literal;
use crate::model::{CastHash, CAST_HASH_LEN};
use base64::Engine;

const BASE64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

/// Decodes a cast hash from any supported literal encoding.
pub fn decode_cast_hash(value: &Literal) -> DecodeResult<CastHash> {
    let bytes = match value {
        Literal::Bytes(bytes) => bytes.clone(),
        Literal::Map(_) => buffer_bytes(value)?,
        Literal::Str(text) => text_bytes(text)?,
        other => {
            return Err(DecodeError::element(format!(
                "hash must be bytes, string or Buffer object, got {}",
                other.type_name()
            )))
        }
    };
    CastHash::from_slice(&bytes).map_err(DecodeError::hash_length)
}

fn buffer_bytes(value: &Literal) -> DecodeResult<Vec<u8>> {
    if value.get("type").and_then(Literal::as_str) != Some("Buffer") {
        return Err(DecodeError::element(
            "hash object must be Buffer format with 'data' and 'type' fields",
        ));
    }
    let Some(Literal::List(items)) = value.get("data") else {
        return Err(DecodeError::element("Buffer data must be a list of integers"));
    };
    items
        .iter()
        .map(|item| match item {
            Literal::Int(i) => u8::try_from(*i)
                .map_err(|_| DecodeError::element(format!("Buffer byte out of range: {i}"))),
            other => Err(DecodeError::element(format!(
                "Buffer data must contain integers, got {}",
                other.type_name()
            ))),
        })
        .collect()
}

fn text_bytes(text: &str) -> DecodeResult<Vec<u8>> {
    if let Some(digits) = text.strip_prefix("0x") {
        return hex::decode(digits)
            .map_err(|e| DecodeError::element(format!("invalid hex hash {text:?}: {e}")));
    }
    if text.len() == CAST_HASH_LEN * 2 {
        if let Ok(bytes) = hex::decode(text) {
            return Ok(bytes);
        }
    }
    BASE64
        .decode(text)
        .map_err(|_| DecodeError::element(format!("unable to parse hash from {text:?}")))
}
