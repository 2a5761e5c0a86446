//! Configuration for the embed sync binaries.
//!
//! Values come from a JSON file (missing keys take defaults), then
//! `EMBEDS_*` environment variables override individual keys.

use crate::{CoreError, CoreResult};
use embeds_database::{validate_identifier, SchemaName, DEFAULT_VERSION_TABLE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

const DEFAULT_BATCH_SIZE: usize = 1000;

/// Sync configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// SQLite file holding the `casts` table.
    pub source_database: Option<PathBuf>,
    /// SQLite file holding the `cast_embeds` table.
    pub target_database: Option<PathBuf>,
    pub source_schema: SchemaName,
    pub target_schema: SchemaName,
    /// Parent casts per page and rows per flush.
    pub batch_size: usize,
    /// Table recording applied migrations in the target schema.
    pub version_table: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            source_database: None,
            target_database: None,
            source_schema: SchemaName::main(),
            target_schema: SchemaName::main(),
            batch_size: DEFAULT_BATCH_SIZE,
            version_table: DEFAULT_VERSION_TABLE.to_string(),
        }
    }
}

impl Config {
    /// Load from `path` if it exists (defaults otherwise), then apply
    /// environment overrides and validate.
    pub fn load(path: &Path) -> CoreResult<Self> {
        let mut config = if path.exists() {
            Self::load_from_file(path)?
        } else {
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file, without overrides.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file, creating its directory.
    pub fn save(&self, path: &Path) -> CoreResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject values the sync cannot run with.
    pub fn validate(&self) -> CoreResult<()> {
        if self.batch_size == 0 {
            return Err(invalid("batch_size", "must be at least 1"));
        }
        validate_identifier(&self.version_table)
            .map_err(|e| invalid("version_table", e.to_string()))?;
        Ok(())
    }

    /// Apply `EMBEDS_*` overrides read through `lookup`. Empty values are
    /// ignored.
    fn apply_overrides<F>(&mut self, lookup: F) -> CoreResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(level) = var("EMBEDS_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(path) = var("EMBEDS_SOURCE_DB") {
            self.source_database = Some(PathBuf::from(path));
        }
        if let Some(path) = var("EMBEDS_TARGET_DB") {
            self.target_database = Some(PathBuf::from(path));
        }
        if let Some(name) = var("EMBEDS_SOURCE_SCHEMA") {
            self.source_schema =
                SchemaName::new(name).map_err(|e| invalid("EMBEDS_SOURCE_SCHEMA", e.to_string()))?;
        }
        if let Some(name) = var("EMBEDS_TARGET_SCHEMA") {
            self.target_schema =
                SchemaName::new(name).map_err(|e| invalid("EMBEDS_TARGET_SCHEMA", e.to_string()))?;
        }
        if let Some(size) = var("EMBEDS_BATCH_SIZE") {
            self.batch_size = size
                .parse()
                .map_err(|_| invalid("EMBEDS_BATCH_SIZE", format!("not a count: {size}")))?;
        }
        if let Some(table) = var("EMBEDS_VERSION_TABLE") {
            self.version_table = table;
        }
        Ok(())
    }
}

fn invalid(key: &str, message: impl Into<String>) -> CoreError {
    CoreError::InvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}
