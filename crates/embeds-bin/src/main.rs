//! `embeds-sync`: normalizes cast embeds into the `cast_embeds` table.

mod app;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use embeds_config_and_utils::{init_logging, Config, Paths};
use embeds_database::SchemaName;

/// Embed sync command-line interface.
#[derive(Parser)]
#[command(name = "embeds-sync")]
#[command(about = "Incrementally sync cast embeds into a normalized table")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file. Defaults to ~/.fcgraph/embeds.json
    #[arg(long, global = true, env = "EMBEDS_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Log file. Defaults to ~/.fcgraph/logs/embeds.jsonl
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

/// Database selection shared by every subcommand.
#[derive(clap::Args, Debug, Default)]
struct DatabaseArgs {
    /// Target SQLite file (holds cast_embeds)
    #[arg(long)]
    target_db: Option<PathBuf>,

    /// Schema alias the target is attached under
    #[arg(long)]
    target_schema: Option<SchemaName>,

    /// Name of the migration version table
    #[arg(long)]
    version_table: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one incremental sync
    Sync {
        /// Watermark: process casts with updated_at >= this RFC 3339 time
        #[arg(long)]
        since: DateTime<Utc>,

        /// Casts per page and rows per flush
        #[arg(long)]
        batch_size: Option<usize>,

        /// Source SQLite file (holds casts)
        #[arg(long)]
        source_db: Option<PathBuf>,

        /// Schema alias the source is attached under
        #[arg(long)]
        source_schema: Option<SchemaName>,

        #[command(flatten)]
        db: DatabaseArgs,
    },
    /// Manage the cast_embeds schema
    Migrate {
        #[command(subcommand)]
        action: MigrateAction,

        #[command(flatten)]
        db: DatabaseArgs,
    },
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum MigrateAction {
    /// Apply pending migrations
    Up {
        /// Stop at this version (default: latest)
        #[arg(long)]
        to: Option<i32>,
    },
    /// Revert migrations above a version (0 drops everything)
    Down {
        #[arg(long)]
        to: i32,
    },
    /// Show applied and pending migrations
    Status,
}

impl DatabaseArgs {
    fn apply(self, config: &mut Config) {
        if let Some(path) = self.target_db {
            config.target_database = Some(path);
        }
        if let Some(schema) = self.target_schema {
            config.target_schema = schema;
        }
        if let Some(table) = self.version_table {
            config.version_table = table;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let paths = Paths::new()?;
    let config_path = cli.config.unwrap_or_else(|| paths.config_file());
    let mut config = Config::load(&config_path)?;
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }

    let log_file = cli.log_file.unwrap_or_else(|| paths.log_file());
    init_logging(&config.log_level, Some(log_file))?;
    tracing::debug!(config = %config_path.display(), "Configuration loaded");

    match cli.command {
        Commands::Sync {
            since,
            batch_size,
            source_db,
            source_schema,
            db,
        } => {
            db.apply(&mut config);
            if let Some(size) = batch_size {
                config.batch_size = size;
            }
            if let Some(path) = source_db {
                config.source_database = Some(path);
            }
            if let Some(schema) = source_schema {
                config.source_schema = schema;
            }
            config.validate()?;
            app::sync::run(&config, since).await
        }
        Commands::Migrate { action, db } => {
            db.apply(&mut config);
            config.validate()?;
            app::migrate::run(&config, action).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_sync_arguments() {
        let cli = Cli::try_parse_from([
            "embeds-sync",
            "sync",
            "--since",
            "2024-06-01T00:00:00Z",
            "--batch-size",
            "50",
            "--source-schema",
            "neynar",
            "--target-db",
            "/tmp/t.db",
        ])
        .unwrap();

        match cli.command {
            Commands::Sync {
                since,
                batch_size,
                source_schema,
                db,
                ..
            } => {
                assert_eq!(since.to_rfc3339(), "2024-06-01T00:00:00+00:00");
                assert_eq!(batch_size, Some(50));
                assert_eq!(source_schema.map(|s| s.to_string()).as_deref(), Some("neynar"));
                assert_eq!(db.target_db, Some(PathBuf::from("/tmp/t.db")));
            }
            Commands::Migrate { .. } => panic!("expected sync"),
        }
    }

    #[test]
    fn rejects_invalid_schema_and_watermark() {
        assert!(Cli::try_parse_from([
            "embeds-sync",
            "sync",
            "--since",
            "yesterday",
        ])
        .is_err());
        assert!(Cli::try_parse_from([
            "embeds-sync",
            "migrate",
            "--target-schema",
            "bad-name",
            "status",
        ])
        .is_err());
    }

    #[test]
    fn database_args_override_config() {
        let mut config = Config::default();
        DatabaseArgs {
            target_db: Some(PathBuf::from("/x.db")),
            target_schema: Some(SchemaName::new("analytics").unwrap()),
            version_table: None,
        }
        .apply(&mut config);
        assert_eq!(config.target_database, Some(PathBuf::from("/x.db")));
        assert_eq!(config.target_schema.as_str(), "analytics");
        assert_eq!(config.version_table, "cast_embeds_migrations");
    }
}
