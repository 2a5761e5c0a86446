//! Versioned migrations for the target schema.
//!
//! Applied versions are tracked in a caller-named table inside the target
//! schema, so several deployments can share one database file. Every step
//! runs in its own transaction together with its version record.

use crate::schema::{validate_identifier, SchemaName};
use crate::{DatabaseError, DatabaseResult};
use rusqlite::{params, Connection};
use serde::Serialize;
use tracing::{debug, info};

/// Latest schema version.
pub const CURRENT_VERSION: i32 = 1;

/// Default name of the version-tracking table.
pub const DEFAULT_VERSION_TABLE: &str = "cast_embeds_migrations";

/// Name of the normalized embeds table.
pub const CAST_EMBEDS_TABLE: &str = "cast_embeds";

type Step = fn(&Connection, &SchemaName) -> DatabaseResult<()>;

struct Migration {
    version: i32,
    name: &'static str,
    description: &'static str,
    up: Step,
    down: Step,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "create_cast_embeds_table",
    description: "Create cast_embeds table for normalized cast embed data",
    up: migrate_v1_up,
    down: migrate_v1_down,
}];

/// A known migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationInfo {
    pub version: i32,
    pub name: String,
    pub description: String,
}

/// A migration recorded in the version table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedMigration {
    pub version: i32,
    pub name: String,
    pub applied_at: String,
}

/// Snapshot of a schema's migration state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    pub current_version: i32,
    pub latest_version: i32,
    pub pending: Vec<MigrationInfo>,
    pub applied: Vec<AppliedMigration>,
}

/// Applies and reverts migrations for one schema and version table.
#[derive(Debug, Clone)]
pub struct MigrationManager {
    schema: SchemaName,
    version_table: String,
}

impl MigrationManager {
    pub fn new(schema: SchemaName, version_table: impl Into<String>) -> DatabaseResult<Self> {
        let version_table = version_table.into();
        validate_identifier(&version_table)?;
        Ok(Self {
            schema,
            version_table,
        })
    }

    /// All migrations this build knows about, oldest first.
    pub fn history() -> Vec<MigrationInfo> {
        MIGRATIONS.iter().map(info_of).collect()
    }

    /// Upgrade to `to` (latest when `None`). Returns the versions applied.
    pub fn apply_up(&self, conn: &Connection, to: Option<i32>) -> DatabaseResult<Vec<i32>> {
        let target = to.unwrap_or(CURRENT_VERSION);
        if !(0..=CURRENT_VERSION).contains(&target) {
            return Err(DatabaseError::Migration(format!(
                "unknown target version {target} (latest is {CURRENT_VERSION})"
            )));
        }

        self.ensure_version_table(conn)?;
        let current = self.current_version(conn)?;
        if target < current {
            return Err(DatabaseError::Migration(format!(
                "target version {target} is below current version {current}; use apply_down"
            )));
        }

        info!(
            schema = %self.schema,
            current_version = current,
            target_version = target,
            "Running migrations"
        );

        let mut applied = Vec::new();
        for migration in MIGRATIONS
            .iter()
            .filter(|m| m.version > current && m.version <= target)
        {
            info!(version = migration.version, name = migration.name, "Applying migration");
            let tx = conn.unchecked_transaction()?;
            (migration.up)(&tx, &self.schema)?;
            self.record_migration(&tx, migration)?;
            tx.commit()?;
            applied.push(migration.version);
        }

        info!(applied = applied.len(), "Migrations complete");
        Ok(applied)
    }

    /// Downgrade to `to` (0 removes everything). Returns the versions reverted.
    pub fn apply_down(&self, conn: &Connection, to: i32) -> DatabaseResult<Vec<i32>> {
        self.ensure_version_table(conn)?;
        let current = self.current_version(conn)?;
        if to < 0 || to > current {
            return Err(DatabaseError::Migration(format!(
                "cannot downgrade to version {to} from version {current}"
            )));
        }

        let mut reverted = Vec::new();
        for migration in MIGRATIONS
            .iter()
            .rev()
            .filter(|m| m.version > to && m.version <= current)
        {
            info!(version = migration.version, name = migration.name, "Reverting migration");
            let tx = conn.unchecked_transaction()?;
            (migration.down)(&tx, &self.schema)?;
            tx.execute(
                &format!(
                    "DELETE FROM {} WHERE version = ?1",
                    self.schema.qualify(&self.version_table)
                ),
                params![migration.version],
            )?;
            tx.commit()?;
            reverted.push(migration.version);
        }

        Ok(reverted)
    }

    /// Read-only: a missing version table reports nothing applied.
    pub fn status(&self, conn: &Connection) -> DatabaseResult<MigrationStatus> {
        self.require_schema(conn)?;
        if !self.version_table_exists(conn)? {
            return Ok(MigrationStatus {
                current_version: 0,
                latest_version: CURRENT_VERSION,
                pending: Self::history(),
                applied: Vec::new(),
            });
        }
        let current_version = self.current_version(conn)?;

        let mut stmt = conn.prepare(&format!(
            "SELECT version, name, applied_at FROM {} ORDER BY version",
            self.schema.qualify(&self.version_table)
        ))?;
        let applied = stmt
            .query_map([], |row| {
                Ok(AppliedMigration {
                    version: row.get(0)?,
                    name: row.get(1)?,
                    applied_at: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let pending = MIGRATIONS
            .iter()
            .filter(|m| m.version > current_version)
            .map(info_of)
            .collect();

        Ok(MigrationStatus {
            current_version,
            latest_version: CURRENT_VERSION,
            pending,
            applied,
        })
    }

    fn require_schema(&self, conn: &Connection) -> DatabaseResult<()> {
        if !self.schema.exists(conn)? {
            return Err(DatabaseError::Migration(format!(
                "schema {} is not attached",
                self.schema
            )));
        }
        Ok(())
    }

    fn version_table_exists(&self, conn: &Connection) -> DatabaseResult<bool> {
        let found: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {}.sqlite_master WHERE type = 'table' AND name = ?1",
                self.schema.quoted()
            ),
            params![self.version_table],
            |row| row.get(0),
        )?;
        Ok(found > 0)
    }

    fn ensure_version_table(&self, conn: &Connection) -> DatabaseResult<()> {
        self.require_schema(conn)?;
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    version INTEGER PRIMARY KEY,
                    name TEXT NOT NULL,
                    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
                )",
                self.schema.qualify(&self.version_table)
            ),
            [],
        )?;
        Ok(())
    }

    fn current_version(&self, conn: &Connection) -> DatabaseResult<i32> {
        let version = conn.query_row(
            &format!(
                "SELECT COALESCE(MAX(version), 0) FROM {}",
                self.schema.qualify(&self.version_table)
            ),
            [],
            |row| row.get(0),
        )?;
        Ok(version)
    }

    fn record_migration(&self, conn: &Connection, migration: &Migration) -> DatabaseResult<()> {
        conn.execute(
            &format!(
                "INSERT INTO {} (version, name) VALUES (?1, ?2)",
                self.schema.qualify(&self.version_table)
            ),
            params![migration.version, migration.name],
        )?;
        debug!(version = migration.version, name = migration.name, "Migration applied");
        Ok(())
    }
}

fn info_of(migration: &Migration) -> MigrationInfo {
    MigrationInfo {
        version: migration.version,
        name: migration.name.to_string(),
        description: migration.description.to_string(),
    }
}

/// V1: cast_embeds table with its lookup indexes.
fn migrate_v1_up(conn: &Connection, schema: &SchemaName) -> DatabaseResult<()> {
    let s = schema.quoted();
    let table = schema.qualify(CAST_EMBEDS_TABLE);
    conn.execute_batch(&format!(
        "
        CREATE TABLE IF NOT EXISTS {table} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            cast_hash BLOB NOT NULL,
            cast_fid INTEGER NOT NULL,
            embed_index INTEGER NOT NULL CHECK (embed_index BETWEEN 0 AND 65535),
            embed_type TEXT NOT NULL CHECK (embed_type IN ('url', 'cast_reference')),
            url TEXT,
            quoted_cast_hash BLOB,
            quoted_cast_fid INTEGER,
            raw_embed_data TEXT NOT NULL CHECK (json_valid(raw_embed_data)),
            processed_at INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            CONSTRAINT uq_cast_embed_index UNIQUE (cast_hash, embed_index)
        );

        CREATE INDEX IF NOT EXISTS {s}.ix_cast_embeds_cast_hash
            ON cast_embeds(cast_hash);
        CREATE INDEX IF NOT EXISTS {s}.ix_cast_embeds_cast_fid
            ON cast_embeds(cast_fid);
        CREATE INDEX IF NOT EXISTS {s}.ix_cast_embeds_embed_type
            ON cast_embeds(embed_type);
        CREATE INDEX IF NOT EXISTS {s}.ix_cast_embeds_url
            ON cast_embeds(url);
        CREATE INDEX IF NOT EXISTS {s}.ix_cast_embeds_quoted_cast
            ON cast_embeds(quoted_cast_hash, quoted_cast_fid);
        CREATE INDEX IF NOT EXISTS {s}.ix_cast_embeds_processed_at
            ON cast_embeds(processed_at);
        CREATE INDEX IF NOT EXISTS {s}.ix_cast_embeds_url_embeds_only
            ON cast_embeds(url)
            WHERE embed_type = 'url' AND url IS NOT NULL;
        CREATE INDEX IF NOT EXISTS {s}.ix_cast_embeds_quote_embeds_only
            ON cast_embeds(quoted_cast_hash, quoted_cast_fid)
            WHERE embed_type = 'cast_reference' AND quoted_cast_hash IS NOT NULL;
        "
    ))?;
    Ok(())
}

fn migrate_v1_down(conn: &Connection, schema: &SchemaName) -> DatabaseResult<()> {
    conn.execute_batch(&format!(
        "DROP TABLE IF EXISTS {};",
        schema.qualify(CAST_EMBEDS_TABLE)
    ))?;
    Ok(())
}
