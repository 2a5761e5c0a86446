//! Canonical cast embed model and the tolerant decoder that produces it.
//!
//! This crate provides:
//! - The canonical [`Embed`] / [`EmbedList`] model
//! - A safe literal parser for JSON and Python-style payloads
//! - [`decode`], which tolerates malformed elements and reports them per position
//! - [`project`], which flattens a decoded parent into normalized rows
//!
//! Everything here is pure and synchronous; the sync worker runs it on a
//! blocking thread.
//!
//! ```ignore
//! let decoded = decode(&RawEmbeds::from("[{'url': 'https://example.com'}]"))?;
//! let raw = decoded.canonical_json().to_string();
//! let projection = project(&parent_hash, fid, &decoded, &raw, Utc::now());
//! ```

mod decode;
mod error;
mod hash;
pub mod literal;
mod model;
mod projection;

pub use decode::{decode, decode_list, DecodedEmbeds, RawEmbeds, MAX_FID};
pub use error::{DecodeError, DecodeErrorKind, DecodeResult};
pub use hash::decode_cast_hash;
pub use model::{CastHash, CastReference, Embed, EmbedList, EmbedType, CAST_HASH_LEN};
pub use projection::{project, ElementRejection, NormalizedEmbedRow, Projection};
