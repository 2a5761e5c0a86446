//! `embeds-sync sync`.

use super::{migration_manager, open_target, print_json, target_path};
use anyhow::Context;
use chrono::{DateTime, Utc};
use embeds_config_and_utils::Config;
use embeds_sync_worker::{run_sync_with_paths, CancellationToken, SyncPaths, SyncRequest};
use tracing::{error, info, warn};

/// Migrate the target up, run one sync from `since`, and print the result.
pub async fn run(config: &Config, since: DateTime<Utc>) -> anyhow::Result<()> {
    let paths = SyncPaths {
        source_db: config
            .source_database
            .clone()
            .context("no source database: pass --source-db or set EMBEDS_SOURCE_DB")?,
        target_db: target_path(config)?,
    };

    let manager = migration_manager(config)?;
    let db = open_target(config).await?;
    let migrated = db.call(move |conn| manager.apply_up(conn, None)).await;
    db.close().await?;
    let migrated = migrated?;
    if !migrated.is_empty() {
        info!(versions = ?migrated, "Applied pending migrations");
    }

    let request = SyncRequest::new(since)
        .with_batch_size(config.batch_size)
        .with_source_location(config.source_schema.clone())
        .with_target_location(config.target_schema.clone());

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    let signal_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current page");
            on_signal.cancel();
        }
    });

    let outcome = run_sync_with_paths(&paths, &request, &cancel).await;
    signal_task.abort();

    match outcome {
        Ok(result) => {
            if !result.is_clean() {
                warn!(errors = result.error_count(), "Sync finished with errors");
            }
            print_json(&result)
        }
        Err(e) => {
            error!(error = %e, "Sync aborted");
            if let Some(partial) = e.partial() {
                print_json(partial)?;
            }
            Err(anyhow::Error::new(e).context("sync aborted"))
        }
    }
}

