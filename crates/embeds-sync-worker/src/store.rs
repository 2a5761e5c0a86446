//! Source and target store seams, with SQLite implementations.

use async_trait::async_trait;
use cast_embeds_core::NormalizedEmbedRow;
use embeds_database::{queries, AsyncDatabase, DatabaseError, PageQuery, SchemaName, SourceRow};
use thiserror::Error;

/// Failure reported by a store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store cannot be reached at all.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("write failed: {0}")]
    Write(String),
}

impl StoreError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    fn from_read(e: DatabaseError) -> Self {
        if e.is_unavailable() {
            Self::Unavailable(e.to_string())
        } else {
            Self::Query(e.to_string())
        }
    }

    fn from_write(e: DatabaseError) -> Self {
        if e.is_unavailable() {
            Self::Unavailable(e.to_string())
        } else {
            Self::Write(e.to_string())
        }
    }
}

/// Reads pages of changed parent casts. Unreadable rows are returned as
/// [`SourceRow::Malformed`] rather than failing the page.
#[async_trait]
pub trait SourceReader: Send + Sync {
    async fn fetch_page(
        &self,
        location: &SchemaName,
        query: &PageQuery,
    ) -> Result<Vec<SourceRow>, StoreError>;
}

/// Writes normalized rows, idempotent on `(parent_hash, embed_index)`.
#[async_trait]
pub trait TargetWriter: Send + Sync {
    /// Upserts `rows` as one unit and returns how many were written.
    async fn upsert_rows(
        &self,
        location: &SchemaName,
        rows: &[NormalizedEmbedRow],
    ) -> Result<usize, StoreError>;
}

/// Source reader over an [`AsyncDatabase`].
#[derive(Clone)]
pub struct SqliteSource {
    db: AsyncDatabase,
}

impl SqliteSource {
    pub fn new(db: AsyncDatabase) -> Self {
        Self { db }
    }

    pub fn into_inner(self) -> AsyncDatabase {
        self.db
    }
}

#[async_trait]
impl SourceReader for SqliteSource {
    async fn fetch_page(
        &self,
        location: &SchemaName,
        query: &PageQuery,
    ) -> Result<Vec<SourceRow>, StoreError> {
        let schema = location.clone();
        let query = *query;
        self.db
            .call(move |conn| queries::fetch_source_page(conn, &schema, &query))
            .await
            .map_err(StoreError::from_read)
    }
}

/// Target writer over an [`AsyncDatabase`].
#[derive(Clone)]
pub struct SqliteTarget {
    db: AsyncDatabase,
}

impl SqliteTarget {
    pub fn new(db: AsyncDatabase) -> Self {
        Self { db }
    }

    pub fn into_inner(self) -> AsyncDatabase {
        self.db
    }
}

#[async_trait]
impl TargetWriter for SqliteTarget {
    async fn upsert_rows(
        &self,
        location: &SchemaName,
        rows: &[NormalizedEmbedRow],
    ) -> Result<usize, StoreError> {
        let schema = location.clone();
        let rows = rows.to_vec();
        self.db
            .call(move |conn| queries::upsert_embed_rows(conn, &schema, &rows))
            .await
            .map_err(StoreError::from_write)
    }
}
