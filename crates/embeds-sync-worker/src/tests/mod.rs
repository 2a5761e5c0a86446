//! Behaviour tests for the sync worker.
//!
//! - `engine.rs` - pipeline semantics against in-memory stores
//! - `sqlite.rs` - end-to-end runs against SQLite files

mod sqlite;

use crate::store::{SourceReader, StoreError, TargetWriter};
use async_trait::async_trait;
use cast_embeds_core::NormalizedEmbedRow;
use chrono::{DateTime, Duration, TimeZone, Utc};
use embeds_database::{MalformedSource, PageQuery, SchemaName, SourceRecord, SourceRow};
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

pub(crate) fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
}

pub(crate) fn at(micros: i64) -> DateTime<Utc> {
    base_time() + Duration::microseconds(micros)
}

pub(crate) fn cast(id: i64, micros: i64, embeds: Option<&str>) -> SourceRecord {
    SourceRecord {
        id,
        parent_hash: vec![id as u8; 20],
        parent_author_id: 1000 + id as u64,
        raw_embeds: embeds.map(str::to_string),
        updated_at: at(micros),
    }
}

pub(crate) fn url_embeds(urls: &[&str]) -> String {
    let items: Vec<String> = urls.iter().map(|u| format!("{{'url': '{u}'}}")).collect();
    format!("[{}]", items.join(", "))
}

/// In-memory source with keyset paging and failure/cancel hooks.
#[derive(Default)]
pub(crate) struct MemorySource {
    records: Mutex<Vec<SourceRow>>,
    fetches: Mutex<usize>,
    fail_on_fetch: Option<usize>,
    cancel_after: Option<(usize, CancellationToken)>,
}

impl MemorySource {
    pub fn new(records: Vec<SourceRecord>) -> Self {
        Self {
            records: Mutex::new(records.into_iter().map(SourceRow::from).collect()),
            ..Default::default()
        }
    }

    pub fn with_malformed(self, malformed: MalformedSource) -> Self {
        self.records
            .lock()
            .expect("lock poisoned")
            .push(SourceRow::Malformed(malformed));
        self
    }

    /// Fail the n-th fetch (1-based).
    pub fn fail_on_fetch(mut self, n: usize) -> Self {
        self.fail_on_fetch = Some(n);
        self
    }

    /// Cancel `token` once `pages` fetches have been served.
    pub fn cancel_after(mut self, pages: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((pages, token));
        self
    }

    pub fn replace(&self, record: SourceRecord) {
        let mut records = self.records.lock().expect("lock poisoned");
        records.retain(|r| r.position().id != record.id);
        records.push(record.into());
    }

    pub fn fetch_count(&self) -> usize {
        *self.fetches.lock().expect("lock poisoned")
    }
}

#[async_trait]
impl SourceReader for MemorySource {
    async fn fetch_page(
        &self,
        _location: &SchemaName,
        query: &PageQuery,
    ) -> Result<Vec<SourceRow>, StoreError> {
        let n = {
            let mut fetches = self.fetches.lock().expect("lock poisoned");
            *fetches += 1;
            *fetches
        };
        if self.fail_on_fetch == Some(n) {
            return Err(StoreError::Query("injected source failure".to_string()));
        }

        let min = query.min_updated_at.timestamp_micros();
        let mut page: Vec<SourceRow> = self
            .records
            .lock()
            .expect("lock poisoned")
            .iter()
            .filter(|r| r.position().updated_at_micros >= min)
            .filter(|r| match query.after {
                Some(c) => r.position() > c,
                None => true,
            })
            .cloned()
            .collect();
        page.sort_by_key(SourceRow::position);
        page.truncate(query.limit);

        if let Some((pages, token)) = &self.cancel_after {
            if n >= *pages {
                token.cancel();
            }
        }
        Ok(page)
    }
}

/// In-memory target keyed like the real table, with injectable failures.
#[derive(Default)]
pub(crate) struct MemoryTarget {
    rows: Mutex<BTreeMap<(Vec<u8>, u16), NormalizedEmbedRow>>,
    flushes: Mutex<Vec<usize>>,
    fail_flushes: HashSet<usize>,
    unavailable: bool,
}

impl MemoryTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the given flushes (1-based) with a write error.
    pub fn failing_flushes(flushes: &[usize]) -> Self {
        Self {
            fail_flushes: flushes.iter().copied().collect(),
            ..Default::default()
        }
    }

    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Default::default()
        }
    }

    pub fn rows(&self) -> Vec<NormalizedEmbedRow> {
        self.rows.lock().expect("lock poisoned").values().cloned().collect()
    }

    pub fn rows_for(&self, parent_hash: &[u8]) -> Vec<NormalizedEmbedRow> {
        self.rows()
            .into_iter()
            .filter(|r| r.parent_hash == parent_hash)
            .collect()
    }

    /// Sizes of every flush attempted, in order.
    pub fn flush_sizes(&self) -> Vec<usize> {
        self.flushes.lock().expect("lock poisoned").clone()
    }
}

#[async_trait]
impl TargetWriter for MemoryTarget {
    async fn upsert_rows(
        &self,
        _location: &SchemaName,
        rows: &[NormalizedEmbedRow],
    ) -> Result<usize, StoreError> {
        if self.unavailable {
            return Err(StoreError::Unavailable("injected outage".to_string()));
        }
        let n = {
            let mut flushes = self.flushes.lock().expect("lock poisoned");
            flushes.push(rows.len());
            flushes.len()
        };
        if self.fail_flushes.contains(&n) {
            return Err(StoreError::Write("injected write failure".to_string()));
        }

        let mut stored = self.rows.lock().expect("lock poisoned");
        for row in rows {
            let key = (row.parent_hash.clone(), row.embed_index);
            let mut row = row.clone();
            // processed_at only moves when the content does
            if let Some(old) = stored.get(&key) {
                let unchanged = NormalizedEmbedRow {
                    processed_at: old.processed_at,
                    ..row.clone()
                };
                if unchanged == *old {
                    row.processed_at = old.processed_at;
                }
            }
            stored.insert(key, row);
        }
        Ok(rows.len())
    }
}
