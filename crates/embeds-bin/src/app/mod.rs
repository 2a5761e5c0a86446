//! Subcommand implementations.

pub mod migrate;
pub mod sync;

use anyhow::Context;
use embeds_config_and_utils::Config;
use embeds_database::{AsyncDatabase, MigrationManager};
use std::path::PathBuf;

fn target_path(config: &Config) -> anyhow::Result<PathBuf> {
    config
        .target_database
        .clone()
        .context("no target database: pass --target-db or set EMBEDS_TARGET_DB")
}

fn migration_manager(config: &Config) -> anyhow::Result<MigrationManager> {
    Ok(MigrationManager::new(
        config.target_schema.clone(),
        config.version_table.clone(),
    )?)
}

/// Open the target database with its schema attached.
async fn open_target(config: &Config) -> anyhow::Result<AsyncDatabase> {
    let path = target_path(config)?;
    AsyncDatabase::open_with_schema(&path, &config.target_schema)
        .await
        .with_context(|| format!("failed to open target database {}", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
