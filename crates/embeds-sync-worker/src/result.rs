//! Sync run statistics and error types.

use crate::store::StoreError;
use cast_embeds_core::DecodeErrorKind;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Classification of a non-fatal error recorded during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncErrorKind {
    OuterStructureInvalid,
    ElementShapeInvalid,
    ReferenceHashLengthInvalid,
    /// A source column other than the embeds could not be read.
    SourceRecordInvalid,
    WriteFlushFailed,
}

impl From<DecodeErrorKind> for SyncErrorKind {
    fn from(kind: DecodeErrorKind) -> Self {
        match kind {
            DecodeErrorKind::OuterStructureInvalid => Self::OuterStructureInvalid,
            DecodeErrorKind::ElementShapeInvalid => Self::ElementShapeInvalid,
            DecodeErrorKind::ReferenceHashLengthInvalid => Self::ReferenceHashLengthInvalid,
        }
    }
}

impl fmt::Display for SyncErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::OuterStructureInvalid => "outer_structure_invalid",
            Self::ElementShapeInvalid => "element_shape_invalid",
            Self::ReferenceHashLengthInvalid => "reference_hash_length_invalid",
            Self::SourceRecordInvalid => "source_record_invalid",
            Self::WriteFlushFailed => "write_flush_failed",
        };
        f.write_str(s)
    }
}

/// One recorded error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncErrorDetail {
    /// Hex hash of the parent cast, or `cast:<id>` when the hash column is
    /// unreadable. `None` for flush failures.
    pub record_id: Option<String>,
    /// Position of the rejected element, for element-level errors.
    pub embed_index: Option<usize>,
    pub kind: SyncErrorKind,
    pub message: String,
}

/// Outcome of a sync run. Built by [`SyncResultBuilder`], read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncResult {
    posts_examined: u64,
    embeds_extracted: u64,
    rows_written: u64,
    error_count: u64,
    max_updated_at: Option<DateTime<Utc>>,
    pages_fetched: u64,
    flushes_attempted: u64,
    cancelled: bool,
    error_details: Vec<SyncErrorDetail>,
}

impl SyncResult {
    pub fn posts_examined(&self) -> u64 {
        self.posts_examined
    }

    pub fn embeds_extracted(&self) -> u64 {
        self.embeds_extracted
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    pub fn error_count(&self) -> u64 {
        self.error_count
    }

    /// Latest `updated_at` seen; the next watermark can start here.
    pub fn max_updated_at(&self) -> Option<DateTime<Utc>> {
        self.max_updated_at
    }

    pub fn pages_fetched(&self) -> u64 {
        self.pages_fetched
    }

    pub fn flushes_attempted(&self) -> u64 {
        self.flushes_attempted
    }

    pub fn cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn error_details(&self) -> &[SyncErrorDetail] {
        &self.error_details
    }

    pub fn is_clean(&self) -> bool {
        self.error_count == 0
    }
}

/// Everything the engine learned from one source record.
#[derive(Debug, Clone)]
pub(crate) struct RecordOutcome {
    /// `None` when the stored timestamp is not representable.
    pub updated_at: Option<DateTime<Utc>>,
    pub embeds_extracted: usize,
    pub errors: Vec<SyncErrorDetail>,
}

/// By-value builder folded over per-record and per-flush outcomes.
#[derive(Debug, Default)]
pub struct SyncResultBuilder {
    result: SyncResult,
}

impl SyncResultBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(mut self, outcome: &RecordOutcome) -> Self {
        let r = &mut self.result;
        r.posts_examined += 1;
        r.embeds_extracted += outcome.embeds_extracted as u64;
        r.max_updated_at = r.max_updated_at.max(outcome.updated_at);
        for error in &outcome.errors {
            self = self.error(error.clone());
        }
        self
    }

    pub fn page_fetched(mut self) -> Self {
        self.result.pages_fetched += 1;
        self
    }

    pub fn flush_succeeded(mut self, rows: usize) -> Self {
        self.result.flushes_attempted += 1;
        self.result.rows_written += rows as u64;
        self
    }

    pub fn flush_failed(mut self, message: impl Into<String>) -> Self {
        self.result.flushes_attempted += 1;
        self.error(SyncErrorDetail {
            record_id: None,
            embed_index: None,
            kind: SyncErrorKind::WriteFlushFailed,
            message: message.into(),
        })
    }

    pub fn error(mut self, detail: SyncErrorDetail) -> Self {
        self.result.error_count += 1;
        self.result.error_details.push(detail);
        self
    }

    pub fn cancelled(mut self) -> Self {
        self.result.cancelled = true;
        self
    }

    pub fn build(self) -> SyncResult {
        self.result
    }
}

/// A fatal failure. Carries the progress made before it happened.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("invalid sync request: {0}")]
    InvalidRequest(String),

    #[error("source query failed: {error}")]
    Source {
        #[source]
        error: StoreError,
        partial: SyncResult,
    },

    #[error("target unavailable: {error}")]
    Target {
        #[source]
        error: StoreError,
        partial: SyncResult,
    },

    #[error("decode worker failed: {message}")]
    Worker { message: String, partial: SyncResult },
}

impl SyncError {
    /// Progress made before the failure, if the run had started.
    pub fn partial(&self) -> Option<&SyncResult> {
        match self {
            Self::InvalidRequest(_) => None,
            Self::Source { partial, .. }
            | Self::Target { partial, .. }
            | Self::Worker { partial, .. } => Some(partial),
        }
    }
}
