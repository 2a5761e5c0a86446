//! Decode error types.
//!
//! Every failure carries a [`DecodeErrorKind`] so callers can decide how severe
//! it is: an outer failure loses the whole payload, an element failure loses a
//! single embed.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Classification of a decode failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeErrorKind {
    /// The raw embeds field as a whole could not be parsed into a list.
    OuterStructureInvalid,
    /// One element matches neither the URL nor the cast-reference shape.
    ElementShapeInvalid,
    /// A cast-reference hash decoded to something other than 20 bytes.
    ReferenceHashLengthInvalid,
}

impl DecodeErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OuterStructureInvalid => "outer_structure_invalid",
            Self::ElementShapeInvalid => "element_shape_invalid",
            Self::ReferenceHashLengthInvalid => "reference_hash_length_invalid",
        }
    }

    /// True for failures that only affect a single element of the list.
    pub fn is_element_level(&self) -> bool {
        !matches!(self, Self::OuterStructureInvalid)
    }
}

impl fmt::Display for DecodeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified decode failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct DecodeError {
    pub kind: DecodeErrorKind,
    pub message: String,
}

impl DecodeError {
    pub fn outer(message: impl Into<String>) -> Self {
        Self {
            kind: DecodeErrorKind::OuterStructureInvalid,
            message: message.into(),
        }
    }

    pub fn element(message: impl Into<String>) -> Self {
        Self {
            kind: DecodeErrorKind::ElementShapeInvalid,
            message: message.into(),
        }
    }

    pub fn hash_length(actual: usize) -> Self {
        Self {
            kind: DecodeErrorKind::ReferenceHashLengthInvalid,
            message: format!("hash must be exactly 20 bytes, got {actual}"),
        }
    }
}

/// Result type alias using DecodeError.
pub type DecodeResult<T> = Result<T, DecodeError>;
