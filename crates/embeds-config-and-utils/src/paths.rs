//! File system locations used by the sync binaries.

use crate::{CoreError, CoreResult};
use std::path::{Path, PathBuf};

/// Resolves config and log locations under one base directory.
#[derive(Debug, Clone)]
pub struct Paths {
    base_dir: PathBuf,
}

impl Paths {
    /// Paths rooted at `~/.fcgraph`.
    pub fn new() -> CoreResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| CoreError::Path("Could not determine home directory".to_string()))?;
        Ok(Self {
            base_dir: home.join(".fcgraph"),
        })
    }

    /// Paths rooted at a custom base directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// `<base>/embeds.json`
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("embeds.json")
    }

    /// `<base>/logs`
    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// `<base>/logs/embeds.jsonl`
    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join("embeds.jsonl")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_under_base_dir() {
        let paths = Paths::with_base_dir(PathBuf::from("/tmp/fc"));
        assert_eq!(paths.config_file(), PathBuf::from("/tmp/fc/embeds.json"));
        assert_eq!(paths.log_file(), PathBuf::from("/tmp/fc/logs/embeds.jsonl"));
    }
}
