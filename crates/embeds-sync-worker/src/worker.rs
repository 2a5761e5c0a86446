//! The incremental sync loop.

use crate::result::{
    RecordOutcome, SyncError, SyncErrorDetail, SyncErrorKind, SyncResult, SyncResultBuilder,
};
use crate::store::{SourceReader, SqliteSource, SqliteTarget, StoreError, TargetWriter};
use cast_embeds_core::{decode, project, NormalizedEmbedRow, RawEmbeds};
use chrono::{DateTime, Utc};
use embeds_database::{AsyncDatabase, MalformedSource, PageQuery, SchemaName, SourceRecord, SourceRow};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default number of parent casts per page, and rows per flush.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Parameters of one sync run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    /// Watermark: only casts with `updated_at >= min_updated_at` are read.
    pub min_updated_at: DateTime<Utc>,
    pub batch_size: usize,
    pub source_location: SchemaName,
    pub target_location: SchemaName,
}

impl SyncRequest {
    pub fn new(min_updated_at: DateTime<Utc>) -> Self {
        Self {
            min_updated_at,
            batch_size: DEFAULT_BATCH_SIZE,
            source_location: SchemaName::main(),
            target_location: SchemaName::main(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_source_location(mut self, location: SchemaName) -> Self {
        self.source_location = location;
        self
    }

    pub fn with_target_location(mut self, location: SchemaName) -> Self {
        self.target_location = location;
        self
    }
}

/// Database files for [`run_sync_with_paths`].
#[derive(Debug, Clone)]
pub struct SyncPaths {
    pub source_db: PathBuf,
    pub target_db: PathBuf,
}

/// Rows and outcome produced from one source record.
struct ProcessedRecord {
    rows: Vec<NormalizedEmbedRow>,
    outcome: RecordOutcome,
}

/// Handles one page row. Pure; runs on a blocking thread.
fn process_row(row: &SourceRow, processed_at: DateTime<Utc>) -> ProcessedRecord {
    match row {
        SourceRow::Record(record) => process_record(record, processed_at),
        SourceRow::Malformed(malformed) => reject_malformed(malformed),
    }
}

/// An unreadable source row yields no rows and one error. An unreadable
/// embeds column counts as an outer structure failure.
fn reject_malformed(malformed: &MalformedSource) -> ProcessedRecord {
    let record_id = match &malformed.parent_hash {
        Some(hash) => format!("0x{}", hex::encode(hash)),
        None => format!("cast:{}", malformed.id),
    };
    let kind = match malformed.column {
        "embeds" => SyncErrorKind::OuterStructureInvalid,
        _ => SyncErrorKind::SourceRecordInvalid,
    };
    let message = format!(
        "cast {}: unreadable {} column: {}",
        malformed.id, malformed.column, malformed.reason
    );
    warn!(record_id = %record_id, cast_id = malformed.id, kind = %kind, "{message}");

    ProcessedRecord {
        rows: Vec::new(),
        outcome: RecordOutcome {
            updated_at: malformed.updated_at(),
            embeds_extracted: 0,
            errors: vec![SyncErrorDetail {
                record_id: Some(record_id),
                embed_index: None,
                kind,
                message,
            }],
        },
    }
}

/// Decodes and projects one record.
fn process_record(record: &SourceRecord, processed_at: DateTime<Utc>) -> ProcessedRecord {
    let record_id = format!("0x{}", hex::encode(&record.parent_hash));
    let raw = RawEmbeds::from(record.raw_embeds.clone());

    let decoded = match decode(&raw) {
        Ok(decoded) => decoded,
        Err(e) => {
            warn!(record_id = %record_id, error = %e, "Failed to parse embeds");
            return ProcessedRecord {
                rows: Vec::new(),
                outcome: RecordOutcome {
                    updated_at: Some(record.updated_at),
                    embeds_extracted: 0,
                    errors: vec![SyncErrorDetail {
                        record_id: Some(record_id),
                        embed_index: None,
                        kind: e.kind.into(),
                        message: e.message,
                    }],
                },
            };
        }
    };

    let raw_source = decoded.canonical_json().to_string();
    let projection = project(
        &record.parent_hash,
        record.parent_author_id,
        &decoded,
        &raw_source,
        processed_at,
    );

    let errors = projection
        .rejected
        .into_iter()
        .map(|rejection| {
            warn!(
                record_id = %record_id,
                embed_index = rejection.embed_index,
                error = %rejection.error,
                "Rejected embed"
            );
            SyncErrorDetail {
                record_id: Some(record_id.clone()),
                embed_index: Some(rejection.embed_index),
                kind: rejection.error.kind.into(),
                message: rejection.error.message,
            }
        })
        .collect();

    ProcessedRecord {
        outcome: RecordOutcome {
            updated_at: Some(record.updated_at),
            embeds_extracted: projection.rows.len(),
            errors,
        },
        rows: projection.rows,
    }
}

/// Writes one unit. Only an unavailable target is fatal.
async fn flush<T>(
    target: &T,
    location: &SchemaName,
    rows: &[NormalizedEmbedRow],
    builder: SyncResultBuilder,
) -> Result<SyncResultBuilder, SyncError>
where
    T: TargetWriter + ?Sized,
{
    match target.upsert_rows(location, rows).await {
        Ok(written) => {
            debug!(rows = written, "Flushed embed rows");
            Ok(builder.flush_succeeded(written))
        }
        Err(error @ StoreError::Unavailable(_)) => Err(SyncError::Target {
            error,
            partial: builder.build(),
        }),
        Err(error) => {
            warn!(rows = rows.len(), error = %error, "Flush failed");
            Ok(builder.flush_failed(format!("flush of {} rows failed: {error}", rows.len())))
        }
    }
}

/// Runs one incremental sync from `source` to `target`.
///
/// Reads every cast with `updated_at >= request.min_updated_at` in keyset
/// pages, decodes and projects each, and upserts the rows in batches.
/// Per-cast decode failures and failed flushes are recorded in the result;
/// cancellation is honoured between pages.
pub async fn run_sync<S, T>(
    source: &S,
    target: &T,
    request: &SyncRequest,
    cancel: &CancellationToken,
) -> Result<SyncResult, SyncError>
where
    S: SourceReader + ?Sized,
    T: TargetWriter + ?Sized,
{
    if request.batch_size == 0 {
        return Err(SyncError::InvalidRequest("batch_size must be at least 1".to_string()));
    }

    info!(
        min_updated_at = %request.min_updated_at,
        batch_size = request.batch_size,
        source = %request.source_location,
        target = %request.target_location,
        "Starting embed sync"
    );

    let batch_size = request.batch_size;
    let mut builder = SyncResultBuilder::new();
    let mut query = PageQuery::first(request.min_updated_at, batch_size);
    let mut pending: Vec<NormalizedEmbedRow> = Vec::new();

    loop {
        if cancel.is_cancelled() {
            info!("Sync cancelled");
            builder = builder.cancelled();
            break;
        }

        let page = match source.fetch_page(&request.source_location, &query).await {
            Ok(page) => page,
            Err(error) => {
                return Err(SyncError::Source {
                    error,
                    partial: builder.build(),
                })
            }
        };
        builder = builder.page_fetched();

        let page_len = page.len();
        let next_query = page.last().map(|last| query.next_after(last));
        debug!(records = page_len, "Fetched page");

        let processed_at = Utc::now();
        let processed = match tokio::task::spawn_blocking(move || {
            page.iter()
                .map(|row| process_row(row, processed_at))
                .collect::<Vec<_>>()
        })
        .await
        {
            Ok(processed) => processed,
            Err(e) => {
                return Err(SyncError::Worker {
                    message: e.to_string(),
                    partial: builder.build(),
                })
            }
        };

        for record in processed {
            builder = builder.record(&record.outcome);
            pending.extend(record.rows);
            while pending.len() >= batch_size {
                let unit: Vec<_> = pending.drain(..batch_size).collect();
                builder = flush(target, &request.target_location, &unit, builder).await?;
            }
        }
        if !pending.is_empty() {
            let unit = std::mem::take(&mut pending);
            builder = flush(target, &request.target_location, &unit, builder).await?;
        }

        match next_query {
            Some(next) if page_len >= batch_size => query = next,
            _ => break,
        }
    }

    let result = builder.build();
    info!(
        posts_examined = result.posts_examined(),
        embeds_extracted = result.embeds_extracted(),
        rows_written = result.rows_written(),
        errors = result.error_count(),
        cancelled = result.cancelled(),
        "Embed sync finished"
    );
    Ok(result)
}

/// Opens both databases, runs [`run_sync`], and closes both on every path.
pub async fn run_sync_with_paths(
    paths: &SyncPaths,
    request: &SyncRequest,
    cancel: &CancellationToken,
) -> Result<SyncResult, SyncError> {
    let source_db = AsyncDatabase::open_with_schema(&paths.source_db, &request.source_location)
        .await
        .map_err(|e| SyncError::Source {
            error: StoreError::Unavailable(e.to_string()),
            partial: SyncResult::default(),
        })?;

    let target_db = match AsyncDatabase::open_with_schema(&paths.target_db, &request.target_location).await {
        Ok(db) => db,
        Err(e) => {
            close_quietly(source_db).await;
            return Err(SyncError::Target {
                error: StoreError::Unavailable(e.to_string()),
                partial: SyncResult::default(),
            });
        }
    };

    let source = SqliteSource::new(source_db);
    let target = SqliteTarget::new(target_db);
    let result = run_sync(&source, &target, request, cancel).await;

    close_quietly(source.into_inner()).await;
    close_quietly(target.into_inner()).await;
    result
}

async fn close_quietly(db: AsyncDatabase) {
    let path = db.path().to_string();
    if let Err(e) = db.close().await {
        warn!(path = %path, error = %e, "Failed to close database");
    }
}
