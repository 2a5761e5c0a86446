//! Database model types.

use cast_embeds_core::EmbedType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A parent cast as read from the source `casts` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub id: i64,
    pub parent_hash: Vec<u8>,
    pub parent_author_id: u64,
    /// The embeds column as stored; `None` for SQL NULL.
    pub raw_embeds: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl SourceRecord {
    pub fn position(&self) -> PageCursor {
        PageCursor {
            updated_at_micros: self.updated_at.timestamp_micros(),
            id: self.id,
        }
    }
}

/// A source row with a column that cannot be read as its expected type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedSource {
    pub id: i64,
    pub position: PageCursor,
    /// The hash column, when it was readable.
    pub parent_hash: Option<Vec<u8>>,
    /// First offending column.
    pub column: &'static str,
    pub reason: String,
}

impl MalformedSource {
    /// `updated_at`, when it is a representable timestamp.
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp_micros(self.position.updated_at_micros)
    }
}

/// One row of a source page.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceRow {
    Record(SourceRecord),
    Malformed(MalformedSource),
}

impl SourceRow {
    pub fn position(&self) -> PageCursor {
        match self {
            Self::Record(record) => record.position(),
            Self::Malformed(malformed) => malformed.position,
        }
    }
}

impl From<SourceRecord> for SourceRow {
    fn from(record: SourceRecord) -> Self {
        Self::Record(record)
    }
}

/// Input for seeding a source cast.
#[derive(Debug, Clone)]
pub struct NewSourceCast {
    pub id: i64,
    pub hash: Vec<u8>,
    pub fid: u64,
    pub embeds: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Position of the last row returned by a previous page. Holds the stored
/// microseconds so rows with unrepresentable timestamps can still be passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PageCursor {
    pub updated_at_micros: i64,
    pub id: i64,
}

/// One keyset page request against the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageQuery {
    pub min_updated_at: DateTime<Utc>,
    /// Exclusive lower bound on `(updated_at, id)`; `None` for the first page.
    pub after: Option<PageCursor>,
    pub limit: usize,
}

impl PageQuery {
    pub fn first(min_updated_at: DateTime<Utc>, limit: usize) -> Self {
        Self {
            min_updated_at,
            after: None,
            limit,
        }
    }

    /// The query for the page following `last`.
    pub fn next_after(&self, last: &SourceRow) -> Self {
        Self {
            after: Some(last.position()),
            ..*self
        }
    }
}

/// A row of the target `cast_embeds` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEmbedRow {
    pub id: i64,
    pub cast_hash: Vec<u8>,
    pub cast_fid: u64,
    pub embed_index: u16,
    pub embed_type: EmbedType,
    pub url: Option<String>,
    pub quoted_cast_hash: Option<Vec<u8>>,
    pub quoted_cast_fid: Option<u64>,
    pub raw_embed_data: String,
    pub processed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
