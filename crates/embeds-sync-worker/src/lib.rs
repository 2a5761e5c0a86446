//! # Embeds sync worker
//!
//! Incrementally copies cast embeds from a source `casts` table into the
//! normalized `cast_embeds` table.
//!
//! ```text
//! ┌──────────────┐  keyset pages   ┌────────────────────┐  batched upserts  ┌──────────────┐
//! │ SourceReader │────────────────▶│ decode + project   │──────────────────▶│ TargetWriter │
//! │   (casts)    │                 │ (blocking thread)  │                   │ (cast_embeds)│
//! └──────────────┘                 └────────────────────┘                   └──────────────┘
//! ```
//!
//! ## Key Features
//!
//! - **Watermark sync**: the caller passes `min_updated_at` and advances it
//!   from [`SyncResult::max_updated_at`]; the worker keeps no state.
//!
//! - **Keyset pagination** on `(updated_at, id)`, so ties on the timestamp
//!   never skip or repeat records within a run.
//!
//! - **Idempotent writes**: rows are upserted on `(parent_hash, embed_index)`,
//!   one transaction per flush. Reruns and concurrent runs are safe.
//!
//! - **Error accounting**: bad payloads and failed flushes are recorded in the
//!   result instead of aborting the run.
//!
//! ## Example
//!
//! ```ignore
//! let request = SyncRequest::new(watermark).with_batch_size(500);
//! let result = run_sync(&source, &target, &request, &CancellationToken::new()).await?;
//! for detail in result.error_details() {
//!     warn!(kind = %detail.kind, "{}", detail.message);
//! }
//! ```

mod result;
mod store;
mod worker;

pub use result::{SyncError, SyncErrorDetail, SyncErrorKind, SyncResult, SyncResultBuilder};
pub use store::{SourceReader, SqliteSource, SqliteTarget, StoreError, TargetWriter};
pub use worker::{run_sync, run_sync_with_paths, SyncPaths, SyncRequest, DEFAULT_BATCH_SIZE};

pub use embeds_database::{MalformedSource, PageCursor, PageQuery, SchemaName, SourceRecord, SourceRow};
pub use tokio_util::sync::CancellationToken;

#[cfg(test)]
mod tests;
