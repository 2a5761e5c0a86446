//! Tolerant embed decoder.
//!
//! Turns a raw embeds field, in whatever shape the source stored it, into
//! per-element decode outcomes. The outer structure either parses as a list or
//! the whole value fails with [`DecodeErrorKind::OuterStructureInvalid`](crate::DecodeErrorKind); once
//! it does parse, each element is validated on its own.

use crate::error::{DecodeError, DecodeResult};
use crate::hash::decode_cast_hash;
use crate::literal::{self, Literal};
use crate::model::{CastReference, Embed, EmbedList};
use serde_json::Value;

/// How many times a string payload may wrap another encoded payload.
const MAX_UNWRAP_DEPTH: usize = 2;

/// The raw embeds field of a source row.
#[derive(Debug, Clone, PartialEq)]
pub enum RawEmbeds {
    /// SQL NULL or a missing column.
    Absent,
    /// Text that still needs parsing (JSON or Python-literal style).
    Text(String),
    /// Already-structured JSON.
    Structured(Value),
}

impl From<Option<String>> for RawEmbeds {
    fn from(value: Option<String>) -> Self {
        value.map(Self::Text).unwrap_or(Self::Absent)
    }
}

impl From<&str> for RawEmbeds {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<Value> for RawEmbeds {
    fn from(value: Value) -> Self {
        Self::Structured(value)
    }
}

/// Decoder output: one slot per raw element, in original position.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedEmbeds {
    slots: Vec<DecodeResult<Embed>>,
    canonical: Value,
}

impl DecodedEmbeds {
    fn empty() -> Self {
        Self {
            slots: Vec::new(),
            canonical: Value::Array(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[DecodeResult<Embed>] {
        &self.slots
    }

    /// Valid embeds with their original positions.
    pub fn embeds(&self) -> impl Iterator<Item = (usize, &Embed)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().ok().map(|embed| (i, embed)))
    }

    /// Rejected elements with their original positions.
    pub fn rejections(&self) -> impl Iterator<Item = (usize, &DecodeError)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().err().map(|err| (i, err)))
    }

    pub fn valid_count(&self) -> usize {
        self.embeds().count()
    }

    /// The parsed payload re-serialized as well-formed JSON.
    pub fn canonical_json(&self) -> &Value {
        &self.canonical
    }

    /// Keeps only the valid embeds, dropping rejected positions.
    pub fn into_list(self) -> EmbedList {
        self.slots.into_iter().filter_map(Result::ok).collect()
    }
}

/// Decodes a raw embeds field, tolerating malformed individual elements.
pub fn decode(raw: &RawEmbeds) -> DecodeResult<DecodedEmbeds> {
    let literal = match raw {
        RawEmbeds::Absent => return Ok(DecodedEmbeds::empty()),
        RawEmbeds::Text(text) => parse_text(text, 0)?,
        RawEmbeds::Structured(Value::String(text)) => parse_text(text, 1)?,
        RawEmbeds::Structured(value) => Literal::from(value),
    };
    decode_literal(&literal)
}

/// Decodes a raw embeds field, failing on the first rejected element.
pub fn decode_list(raw: &RawEmbeds) -> DecodeResult<EmbedList> {
    let decoded = decode(raw)?;
    if let Some((index, err)) = decoded.rejections().next() {
        return Err(DecodeError {
            kind: err.kind,
            message: format!("embed {index}: {}", err.message),
        });
    }
    Ok(decoded.into_list())
}

fn parse_text(text: &str, depth: usize) -> DecodeResult<Literal> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(Literal::Null);
    }
    let parsed = literal::parse(trimmed)
        .map_err(|e| DecodeError::outer(format!("failed to parse embeds: {e}")))?;
    match parsed {
        Literal::Str(inner) if depth < MAX_UNWRAP_DEPTH => parse_text(&inner, depth + 1),
        Literal::Str(_) => Err(DecodeError::outer("embeds payload is nested inside too many strings")),
        other => Ok(other),
    }
}

fn decode_literal(literal: &Literal) -> DecodeResult<DecodedEmbeds> {
    match literal {
        Literal::Null => Ok(DecodedEmbeds::empty()),
        Literal::Map(entries) if entries.is_empty() => Ok(DecodedEmbeds::empty()),
        Literal::List(items) => Ok(DecodedEmbeds {
            slots: items.iter().map(decode_element).collect(),
            canonical: literal.to_json(),
        }),
        other => Err(DecodeError::outer(format!(
            "expected a list of embeds, got {}",
            other.type_name()
        ))),
    }
}

fn decode_element(item: &Literal) -> DecodeResult<Embed> {
    if !matches!(item, Literal::Map(_)) {
        return Err(DecodeError::element(format!(
            "expected a mapping in embeds list, got {}",
            item.type_name()
        )));
    }

    let url = item.get("url");
    let cast_id = item.get("castId").or_else(|| item.get("cast_id"));

    match (url, cast_id) {
        (Some(url), None) => url
            .as_str()
            .map(|u| Embed::Url(u.to_string()))
            .ok_or_else(|| DecodeError::element(format!("url must be a string, got {}", url.type_name()))),
        (None, Some(cast_id)) => decode_reference(cast_id).map(Embed::CastQuote),
        _ => Err(DecodeError::element("exactly one of 'url' or 'castId' must be provided")),
    }
}

/// Largest accepted fid; author ids are stored as signed 64-bit integers.
pub const MAX_FID: u64 = i64::MAX as u64;

fn decode_reference(value: &Literal) -> DecodeResult<CastReference> {
    if !matches!(value, Literal::Map(_)) {
        return Err(DecodeError::element(format!(
            "castId must be a mapping, got {}",
            value.type_name()
        )));
    }

    let author_id = match value.get("fid") {
        Some(Literal::Int(fid)) => u64::try_from(*fid)
            .ok()
            .filter(|fid| *fid <= MAX_FID)
            .ok_or_else(|| DecodeError::element(format!("castId.fid out of range: {fid}")))?,
        Some(other) => {
            return Err(DecodeError::element(format!(
                "castId.fid must be an integer, got {}",
                other.type_name()
            )))
        }
        None => return Err(DecodeError::element("castId.fid is required")),
    };

    let hash = value
        .get("hash")
        .ok_or_else(|| DecodeError::element("castId.hash is required"))?;
    let cast_hash = decode_cast_hash(hash)?;

    Ok(CastReference { author_id, cast_hash })
}
