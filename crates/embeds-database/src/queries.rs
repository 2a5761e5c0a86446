//! Standalone query functions that work with any Connection.
//!
//! Each function takes a `&Connection` and the schema to operate in. Table
//! names are fixed; only the schema varies.

use crate::migrations::CAST_EMBEDS_TABLE;
use crate::schema::SchemaName;
use crate::{
    DatabaseResult, MalformedSource, NewSourceCast, PageCursor, PageQuery, SourceRecord, SourceRow,
    StoredEmbedRow,
};
use cast_embeds_core::{EmbedType, NormalizedEmbedRow};
use chrono::{DateTime, Utc};
use rusqlite::types::{Type, ValueRef};
use rusqlite::{params, Connection, Row};
use tracing::debug;

/// Name of the source table.
pub const CASTS_TABLE: &str = "casts";

// ==========================================
// Source casts
// ==========================================

/// Create the source `casts` table if it does not exist.
///
/// Production sources are owned elsewhere; this is for local runs and tests.
pub fn ensure_source_table(conn: &Connection, schema: &SchemaName) -> DatabaseResult<()> {
    let table = schema.qualify(CASTS_TABLE);
    let s = schema.quoted();
    conn.execute_batch(&format!(
        "
        CREATE TABLE IF NOT EXISTS {table} (
            id INTEGER PRIMARY KEY,
            hash BLOB NOT NULL,
            fid INTEGER NOT NULL,
            embeds TEXT,
            updated_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS {s}.ix_casts_updated_at_id
            ON casts(updated_at, id);
        "
    ))?;
    Ok(())
}

/// Insert or replace a source cast.
pub fn insert_source_cast(
    conn: &Connection,
    schema: &SchemaName,
    cast: &NewSourceCast,
) -> DatabaseResult<()> {
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO {} (id, hash, fid, embeds, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            schema.qualify(CASTS_TABLE)
        ),
        params![
            cast.id,
            cast.hash,
            cast.fid,
            cast.embeds,
            to_micros(cast.updated_at),
        ],
    )?;
    Ok(())
}

/// Fetch one keyset page of casts ordered by `(updated_at, id)`.
///
/// Rows whose columns cannot be read as their expected types come back as
/// [`SourceRow::Malformed`] so the caller can report them and move past.
/// Rows whose `updated_at` is not stored as an integer are not visible.
pub fn fetch_source_page(
    conn: &Connection,
    schema: &SchemaName,
    query: &PageQuery,
) -> DatabaseResult<Vec<SourceRow>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT id, hash, fid, embeds, updated_at
         FROM {}
         WHERE typeof(updated_at) = 'integer'
           AND updated_at >= ?1
           AND (?2 IS NULL OR updated_at > ?2 OR (updated_at = ?2 AND id > ?3))
         ORDER BY updated_at ASC, id ASC
         LIMIT ?4",
        schema.qualify(CASTS_TABLE)
    ))?;

    let after_ts = query.after.map(|c| c.updated_at_micros);
    let after_id = query.after.map(|c| c.id);
    let limit = i64::try_from(query.limit).unwrap_or(i64::MAX);

    let rows = stmt
        .query_map(
            params![to_micros(query.min_updated_at), after_ts, after_id, limit],
            source_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;

    let malformed = rows
        .iter()
        .filter(|r| matches!(r, SourceRow::Malformed(_)))
        .count();
    debug!(schema = %schema, count = rows.len(), malformed, "Fetched source page");
    Ok(rows)
}

fn source_row(row: &Row<'_>) -> rusqlite::Result<SourceRow> {
    let id: i64 = row.get(0)?;
    let updated_at_micros: i64 = row.get(4)?;
    let position = PageCursor {
        updated_at_micros,
        id,
    };

    let parent_hash = match row.get_ref(1)? {
        ValueRef::Blob(bytes) => Some(bytes.to_vec()),
        _ => None,
    };
    let malformed = |column: &'static str, reason: String| {
        SourceRow::Malformed(MalformedSource {
            id,
            position,
            parent_hash: parent_hash.clone(),
            column,
            reason,
        })
    };

    let Some(hash) = parent_hash.clone() else {
        let found = storage_class(row.get_ref(1)?);
        return Ok(malformed("hash", format!("expected a blob, found {found}")));
    };
    let parent_author_id = match row.get_ref(2)? {
        ValueRef::Integer(fid) => match u64::try_from(fid) {
            Ok(fid) => fid,
            Err(_) => return Ok(malformed("fid", format!("negative fid {fid}"))),
        },
        other => {
            let found = storage_class(other);
            return Ok(malformed("fid", format!("expected an integer, found {found}")));
        }
    };
    let raw_embeds = match text_column(row.get_ref(3)?) {
        Ok(text) => text,
        Err(reason) => return Ok(malformed("embeds", reason)),
    };
    let Some(updated_at) = from_micros(updated_at_micros) else {
        return Ok(malformed(
            "updated_at",
            format!("timestamp out of range: {updated_at_micros}"),
        ));
    };

    Ok(SourceRow::Record(SourceRecord {
        id,
        parent_hash: hash,
        parent_author_id,
        raw_embeds,
        updated_at,
    }))
}

// ==========================================
// Cast embeds
// ==========================================

/// Upsert normalized rows keyed on `(cast_hash, embed_index)` in one transaction.
///
/// `created_at` survives an overwrite and `updated_at` is refreshed every
/// time. `processed_at` only moves when the stored content changes. Later
/// rows win when `rows` repeats a key.
pub fn upsert_embed_rows(
    conn: &Connection,
    schema: &SchemaName,
    rows: &[NormalizedEmbedRow],
) -> DatabaseResult<usize> {
    if rows.is_empty() {
        return Ok(0);
    }

    let now = to_micros(Utc::now());
    let tx = conn.unchecked_transaction()?;
    let mut written = 0;
    {
        let mut stmt = tx.prepare_cached(&format!(
            "INSERT INTO {} (
                cast_hash, cast_fid, embed_index, embed_type, url,
                quoted_cast_hash, quoted_cast_fid, raw_embed_data,
                processed_at, created_at, updated_at
             )
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
             ON CONFLICT(cast_hash, embed_index) DO UPDATE SET
                cast_fid = excluded.cast_fid,
                embed_type = excluded.embed_type,
                url = excluded.url,
                quoted_cast_hash = excluded.quoted_cast_hash,
                quoted_cast_fid = excluded.quoted_cast_fid,
                raw_embed_data = excluded.raw_embed_data,
                processed_at = CASE
                    WHEN cast_fid IS excluded.cast_fid
                     AND embed_type IS excluded.embed_type
                     AND url IS excluded.url
                     AND quoted_cast_hash IS excluded.quoted_cast_hash
                     AND quoted_cast_fid IS excluded.quoted_cast_fid
                     AND raw_embed_data IS excluded.raw_embed_data
                    THEN processed_at
                    ELSE excluded.processed_at
                END,
                updated_at = excluded.updated_at",
            schema.qualify(CAST_EMBEDS_TABLE)
        ))?;

        for row in rows {
            written += stmt.execute(params![
                row.parent_hash,
                row.parent_author_id,
                row.embed_index,
                row.embed_type.as_str(),
                row.url,
                row.referenced_hash.map(|h| h.to_vec()),
                row.referenced_author_id,
                row.raw_source,
                to_micros(row.processed_at),
                now,
            ])?;
        }
    }
    tx.commit()?;

    debug!(schema = %schema, rows = written, "Upserted embed rows");
    Ok(written)
}

/// All embed rows for one parent cast, ordered by index.
pub fn list_embed_rows_for_cast(
    conn: &Connection,
    schema: &SchemaName,
    cast_hash: &[u8],
) -> DatabaseResult<Vec<StoredEmbedRow>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT id, cast_hash, cast_fid, embed_index, embed_type, url,
                quoted_cast_hash, quoted_cast_fid, raw_embed_data,
                processed_at, created_at, updated_at
         FROM {}
         WHERE cast_hash = ?1
         ORDER BY embed_index",
        schema.qualify(CAST_EMBEDS_TABLE)
    ))?;

    let rows = stmt
        .query_map(params![cast_hash], |row| {
            Ok(StoredEmbedRow {
                id: row.get(0)?,
                cast_hash: row.get(1)?,
                cast_fid: row.get(2)?,
                embed_index: row.get(3)?,
                embed_type: embed_type_column(row, 4)?,
                url: row.get(5)?,
                quoted_cast_hash: row.get(6)?,
                quoted_cast_fid: row.get(7)?,
                raw_embed_data: row.get(8)?,
                processed_at: micros_column(row, 9)?,
                created_at: micros_column(row, 10)?,
                updated_at: micros_column(row, 11)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Total number of embed rows.
pub fn count_embed_rows(conn: &Connection, schema: &SchemaName) -> DatabaseResult<u64> {
    let count: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {}", schema.qualify(CAST_EMBEDS_TABLE)),
        [],
        |row| row.get(0),
    )?;
    Ok(count.max(0) as u64)
}

// ==========================================
// Helpers
// ==========================================

/// Timestamps are stored as integer microseconds since the Unix epoch.
pub fn to_micros(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_micros()
}

pub fn from_micros(micros: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_micros(micros)
}

fn micros_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let micros: i64 = row.get(idx)?;
    from_micros(micros).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Integer,
            format!("timestamp out of range: {micros}").into(),
        )
    })
}

fn embed_type_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<EmbedType> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

/// Reads a value of any storage class as text; the embeds column is not
/// always declared or populated as TEXT. Bytes must be valid UTF-8.
fn text_column(value: ValueRef<'_>) -> Result<Option<String>, String> {
    Ok(match value {
        ValueRef::Null => None,
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => Some(
            std::str::from_utf8(bytes)
                .map_err(|e| format!("not valid UTF-8: {e}"))?
                .to_string(),
        ),
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
    })
}

fn storage_class(value: ValueRef<'_>) -> &'static str {
    match value.data_type() {
        Type::Null => "null",
        Type::Integer => "integer",
        Type::Real => "real",
        Type::Text => "text",
        Type::Blob => "blob",
    }
}
