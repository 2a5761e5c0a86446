//! End-to-end runs against SQLite databases.

use super::{at, base_time, url_embeds};
use crate::{
    run_sync, run_sync_with_paths, SqliteSource, SqliteTarget, SyncErrorKind, SyncPaths,
    SyncRequest, SyncResult,
};
use embeds_database::{
    queries, AsyncDatabase, MigrationManager, NewSourceCast, SchemaName, StoredEmbedRow,
    DEFAULT_VERSION_TABLE,
};
use std::path::Path;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

fn source_cast(id: i64, micros: i64, embeds: &str) -> NewSourceCast {
    NewSourceCast {
        id,
        hash: vec![id as u8; 20],
        fid: 500 + id as u64,
        embeds: Some(embeds.to_string()),
        updated_at: at(micros),
    }
}

async fn seed_source(path: &Path, schema: &SchemaName, casts: Vec<NewSourceCast>) {
    let db = AsyncDatabase::open_with_schema(path, schema).await.unwrap();
    let schema = schema.clone();
    db.call(move |conn| {
        queries::ensure_source_table(conn, &schema)?;
        for cast in &casts {
            queries::insert_source_cast(conn, &schema, cast)?;
        }
        Ok(())
    })
    .await
    .unwrap();
    db.close().await.unwrap();
}

async fn migrate_target(path: &Path, schema: &SchemaName) {
    let db = AsyncDatabase::open_with_schema(path, schema).await.unwrap();
    let manager = MigrationManager::new(schema.clone(), DEFAULT_VERSION_TABLE).unwrap();
    db.call(move |conn| manager.apply_up(conn, None)).await.unwrap();
    db.close().await.unwrap();
}

#[tokio::test]
async fn sync_between_files_is_idempotent() {
    let dir = tempdir().unwrap();
    let paths = SyncPaths {
        source_db: dir.path().join("source.db"),
        target_db: dir.path().join("target.db"),
    };
    let main = SchemaName::main();
    let quote = format!(
        "[{{\"castId\": {{\"fid\": 9, \"hash\": \"0x{}\"}}}}, {{\"url\": \"https://q.com\"}}]",
        "0c".repeat(20)
    );
    seed_source(
        &paths.source_db,
        &main,
        vec![
            source_cast(1, 0, &url_embeds(&["https://a.com"])),
            source_cast(2, 1, &quote),
            source_cast(3, 2, "garbage"),
        ],
    )
    .await;
    migrate_target(&paths.target_db, &main).await;

    let request = SyncRequest::new(base_time()).with_batch_size(2);
    let cancel = CancellationToken::new();
    let first = run_sync_with_paths(&paths, &request, &cancel).await.unwrap();

    assert_eq!(first.posts_examined(), 3);
    assert_eq!(first.rows_written(), 3);
    assert_eq!(first.error_count(), 1);
    assert_eq!(first.error_details()[0].kind, SyncErrorKind::OuterStructureInvalid);
    assert_eq!(first.max_updated_at(), Some(at(2)));

    let target = AsyncDatabase::open(&paths.target_db).await.unwrap();
    let before = target
        .call(|conn| queries::list_embed_rows_for_cast(conn, &SchemaName::main(), &[2u8; 20]))
        .await
        .unwrap();
    target.close().await.unwrap();

    assert_eq!(before.len(), 2);
    assert_eq!(before[0].quoted_cast_hash, Some(vec![0x0c; 20]));
    assert_eq!(before[0].quoted_cast_fid, Some(9));
    assert_eq!(before[0].cast_fid, 502);
    assert_eq!(before[1].url.as_deref(), Some("https://q.com"));
    let raw: serde_json::Value = serde_json::from_str(&before[0].raw_embed_data).unwrap();
    assert_eq!(raw[1]["url"], "https://q.com");

    let second = run_sync_with_paths(&paths, &request, &cancel).await.unwrap();
    assert_eq!(second.rows_written(), first.rows_written());

    let target = AsyncDatabase::open(&paths.target_db).await.unwrap();
    let (count, after) = target
        .call(|conn| {
            let schema = SchemaName::main();
            Ok((
                queries::count_embed_rows(conn, &schema)?,
                queries::list_embed_rows_for_cast(conn, &schema, &[2u8; 20])?,
            ))
        })
        .await
        .unwrap();
    target.close().await.unwrap();

    assert_eq!(count, 3);
    // only updated_at moves on a rerun over unchanged content
    for (old, new) in before.iter().zip(&after) {
        assert!(new.updated_at >= old.updated_at);
        let mut new = new.clone();
        new.updated_at = old.updated_at;
        assert_eq!(&new, old);
    }
}

/// One in-memory database holding both the source and the migrated target.
async fn shared_db(casts: Vec<NewSourceCast>) -> AsyncDatabase {
    let db = AsyncDatabase::open_in_memory().await.unwrap();
    db.call(move |conn| {
        let schema = SchemaName::main();
        MigrationManager::new(schema.clone(), DEFAULT_VERSION_TABLE)?.apply_up(conn, None)?;
        queries::ensure_source_table(conn, &schema)?;
        for cast in &casts {
            queries::insert_source_cast(conn, &schema, cast)?;
        }
        Ok(())
    })
    .await
    .unwrap();
    db
}

async fn rows_for(db: &AsyncDatabase, hash: u8) -> Vec<StoredEmbedRow> {
    db.call(move |conn| queries::list_embed_rows_for_cast(conn, &SchemaName::main(), &[hash; 20]))
        .await
        .unwrap()
}

async fn sync_shared(db: &AsyncDatabase, batch_size: usize) -> SyncResult {
    let source = SqliteSource::new(db.clone());
    let target = SqliteTarget::new(db.clone());
    let request = SyncRequest::new(base_time()).with_batch_size(batch_size);
    run_sync(&source, &target, &request, &CancellationToken::new())
        .await
        .unwrap()
}

#[tokio::test]
async fn oversized_quoted_fid_rejects_only_that_embed() {
    let quote = format!(
        "[{{'url': 'https://before.com'}}, {{'castId': {{'fid': {}, 'hash': '0x{}'}}}}, {{'url': 'https://after.com'}}]",
        u64::MAX,
        "0c".repeat(20)
    );
    let db = shared_db(vec![
        source_cast(1, 0, &url_embeds(&["https://a.com"])),
        source_cast(2, 1, &quote),
        source_cast(3, 2, &url_embeds(&["https://c.com"])),
    ])
    .await;

    let result = sync_shared(&db, 10).await;

    assert_eq!(result.posts_examined(), 3);
    assert_eq!(result.rows_written(), 4);
    assert_eq!(result.error_count(), 1);
    let detail = &result.error_details()[0];
    assert_eq!(detail.kind, SyncErrorKind::ElementShapeInvalid);
    assert_eq!(detail.embed_index, Some(1));

    let stored = rows_for(&db, 2).await;
    assert_eq!(stored.iter().map(|r| r.embed_index).collect::<Vec<_>>(), vec![0, 2]);
    assert_eq!(rows_for(&db, 1).await.len(), 1);
    assert_eq!(rows_for(&db, 3).await.len(), 1);
    db.close().await.unwrap();
}

#[tokio::test]
async fn unreadable_source_row_does_not_stop_the_run() {
    let db = shared_db(vec![
        source_cast(1, 0, &url_embeds(&["https://a.com"])),
        source_cast(3, 2, &url_embeds(&["https://c.com"])),
    ])
    .await;
    let micros = at(1).timestamp_micros();
    db.call(move |conn| {
        conn.execute(
            "INSERT INTO casts (id, hash, fid, embeds, updated_at) VALUES (2, ?1, -5, '[]', ?2)",
            rusqlite::params![vec![2u8; 20], micros],
        )?;
        Ok(())
    })
    .await
    .unwrap();

    // one cast per page, so the cursor has to pass the bad row
    let result = sync_shared(&db, 1).await;

    assert_eq!(result.posts_examined(), 3);
    assert_eq!(result.rows_written(), 2);
    assert_eq!(result.error_count(), 1);
    let detail = &result.error_details()[0];
    assert_eq!(detail.kind, SyncErrorKind::SourceRecordInvalid);
    assert_eq!(detail.record_id.as_deref(), Some(format!("0x{}", "02".repeat(20)).as_str()));
    assert!(detail.message.contains("cast 2"));
    assert_eq!(result.max_updated_at(), Some(at(2)));
    assert_eq!(rows_for(&db, 3).await.len(), 1);
    db.close().await.unwrap();
}

#[tokio::test]
async fn same_key_twice_in_one_flush_keeps_the_later_row() {
    let mut repost = source_cast(2, 1, &url_embeds(&["https://new.com"]));
    repost.hash = vec![1u8; 20];
    let db = shared_db(vec![source_cast(1, 0, &url_embeds(&["https://old.com"])), repost]).await;

    let result = sync_shared(&db, 10).await;

    assert_eq!(result.flushes_attempted(), 1);
    assert!(result.is_clean());
    let stored = rows_for(&db, 1).await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].url.as_deref(), Some("https://new.com"));
    assert_eq!(stored[0].cast_fid, 502);
    db.close().await.unwrap();
}

#[tokio::test]
async fn sync_honours_named_schemas() {
    let dir = tempdir().unwrap();
    let paths = SyncPaths {
        source_db: dir.path().join("neynar.db"),
        target_db: dir.path().join("analytics.db"),
    };
    let source_schema = SchemaName::new("neynar").unwrap();
    let target_schema = SchemaName::new("analytics").unwrap();
    seed_source(
        &paths.source_db,
        &source_schema,
        vec![source_cast(1, 0, &url_embeds(&["https://a.com", "https://b.com"]))],
    )
    .await;
    migrate_target(&paths.target_db, &target_schema).await;

    let request = SyncRequest::new(base_time())
        .with_source_location(source_schema)
        .with_target_location(target_schema.clone());
    let result = run_sync_with_paths(&paths, &request, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.rows_written(), 2);

    let target = AsyncDatabase::open_with_schema(&paths.target_db, &target_schema)
        .await
        .unwrap();
    let count = target
        .call(move |conn| queries::count_embed_rows(conn, &target_schema))
        .await
        .unwrap();
    target.close().await.unwrap();
    assert_eq!(count, 2);
}

#[tokio::test]
async fn unmigrated_target_records_flush_failures() {
    let db = AsyncDatabase::open_in_memory().await.unwrap();
    db.call(|conn| {
        let schema = SchemaName::main();
        queries::ensure_source_table(conn, &schema)?;
        queries::insert_source_cast(conn, &schema, &source_cast(1, 0, &url_embeds(&["https://a.com"])))
    })
    .await
    .unwrap();

    let source = SqliteSource::new(db.clone());
    let target = SqliteTarget::new(db.clone());
    let result = run_sync(
        &source,
        &target,
        &SyncRequest::new(base_time()),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(result.posts_examined(), 1);
    assert_eq!(result.rows_written(), 0);
    assert_eq!(result.flushes_attempted(), 1);
    assert_eq!(result.error_details()[0].kind, SyncErrorKind::WriteFlushFailed);
    db.close().await.unwrap();
}

#[tokio::test]
async fn missing_source_table_is_fatal() {
    let db = AsyncDatabase::open_in_memory().await.unwrap();
    let source = SqliteSource::new(db.clone());
    let target = SqliteTarget::new(db.clone());

    let err = run_sync(
        &source,
        &target,
        &SyncRequest::new(base_time()),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, crate::SyncError::Source { .. }));
    assert_eq!(err.partial().map(|p| p.pages_fetched()), Some(0));
    db.close().await.unwrap();
}
